//! 文档验证
//!
//! 两轮验证：先以宽松配置枚举签名中的证书得到国家集合，再只加载这些国家的信任列表，
//! 以在线吊销检查重新验证并分类。

use crate::engine::{DocumentValidator, EngineError, SignatureOutcome, ValidationDepth, VerifierConfig};
use crate::error::{Error, Result};
use crate::protocol::Channel;
use crate::trust::{document_countries, TrustLoader};
use crate::types::{SignatureSummary, ValidationReport, ValidationStatus, ValidityLabel};
use std::io::{BufRead, Write};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

/// 可验证的文件后缀
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".pdf", ".xml", ".asice", ".sce"];

pub fn is_supported(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    SUPPORTED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

fn validation_failure(e: EngineError) -> Error {
    Error::Validation(e.to_string())
}

impl From<&SignatureOutcome> for SignatureSummary {
    fn from(outcome: &SignatureOutcome) -> Self {
        Self {
            signer_name: outcome.signed_by.clone(),
            validity: ValidityLabel::from(outcome.indication),
            signing_time: outcome.signing_time,
            qualification: outcome.qualification.clone(),
            chain_names: outcome.chain.clone(),
            problems: outcome.errors.clone(),
        }
    }
}

/// 验证文档并输出 RESULT
pub fn verify_document<R: BufRead, W: Write>(
    channel: &mut Channel<R, W>,
    validator: &dyn DocumentValidator,
    trust: &TrustLoader<'_>,
    document: &Path,
) -> Result<ValidationReport> {
    let report = validate(validator, trust, document)?;
    info!(status = %report.status, "Verified {}", document.display());
    channel.result(&render_report(&report))?;
    Ok(report)
}

/// 不与宿主交互的验证过程
pub fn validate(
    validator: &dyn DocumentValidator,
    trust: &TrustLoader<'_>,
    document: &Path,
) -> Result<ValidationReport> {
    if !is_supported(document) {
        debug!("Unsupported document type: {}", document.display());
        return Ok(ValidationReport::bare(ValidationStatus::Unknown));
    }

    let signatures = validator
        .signatures(document, &VerifierConfig::ignore_all())
        .map_err(validation_failure)?;
    let countries = document_countries(&signatures);
    if countries.is_empty() {
        debug!("No certificates with a country found, document is unsigned");
        return Ok(ValidationReport::bare(ValidationStatus::Unsigned));
    }
    info!("Loading trusted lists for {:?}", countries);

    let store = trust.load(&countries)?;
    let outcome = validator
        .validate(document, &VerifierConfig::online(store), ValidationDepth::Timestamps)
        .map_err(validation_failure)?;

    Ok(ValidationReport {
        status: ValidationStatus::classify(outcome.signature_count, outcome.valid_signature_count),
        per_signature: outcome.signatures.iter().map(SignatureSummary::from).collect(),
    })
}

/// 渲染单个签名，`t{..}` 由宿主翻译
pub fn render_signature(summary: &SignatureSummary) -> String {
    let signing_time = summary
        .signing_time
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default();

    let mut out = String::new();
    out.push_str(&format!("### t{{Signed by}} {}\n\n", summary.signer_name));
    out.push_str(&format!("**t{{Validity}}**: t{{{}}}\n\n", summary.validity));
    out.push_str(&format!("**t{{Date and time}}**: {}\n\n", signing_time));
    out.push_str(&format!("**t{{Qualification}}**: t{{{}}}\n\n", summary.qualification));
    out.push_str(&format!("**t{{Chain of trust}}**: {}\n\n", summary.chain_names.join(" > ")));

    if !summary.problems.is_empty() {
        out.push_str("**t{Potential problems}**: \n\n");
        for (i, problem) in summary.problems.iter().enumerate() {
            out.push_str(&format!("{}. {}\n\n", i + 1, problem));
        }
    }
    out.push_str("\n\n");
    out
}

/// RESULT 载荷：状态行，随后是每个签名的明细
pub fn render_report(report: &ValidationReport) -> String {
    let mut payload = report.status.as_token().to_string();
    if !report.per_signature.is_empty() {
        payload.push('\n');
        for summary in &report.per_signature {
            payload.push_str(&render_signature(summary));
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        MockDocumentValidator, MockTrustListEngine, SignatureDescriptor, ValidationOutcome,
    };
    use crate::fetch::MockFetcher;
    use crate::trust::TrustSource;
    use crate::types::Indication;
    use std::io::Cursor;
    use std::path::PathBuf;
    use time::macros::datetime;

    fn channel() -> Channel<Cursor<Vec<u8>>, Vec<u8>> {
        Channel::new(Cursor::new(Vec::new()), Vec::new())
    }

    fn output(channel: Channel<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(channel.into_inner().1).unwrap()
    }

    fn source() -> TrustSource {
        TrustSource {
            url: "https://lotl.test/eu-lotl.xml".to_string(),
            keystore_path: PathBuf::from("keystore.p12"),
            keystore_password: "dss-password".to_string(),
            announcement_url: "https://oj.test/".to_string(),
            pivot_support: true,
        }
    }

    /// 密钥库可读，但 LOTL 无法获取，信任存储为空
    fn offline_trust() -> (MockTrustListEngine, MockFetcher) {
        let mut engine = MockTrustListEngine::new();
        engine.expect_open_keystore().returning(|_, _| Ok(Vec::new()));
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_get()
            .returning(|_| Err(Error::Network("offline".to_string())));
        (engine, fetcher)
    }

    fn untouched_trust() -> (MockTrustListEngine, MockFetcher) {
        let mut engine = MockTrustListEngine::new();
        engine.expect_open_keystore().never();
        let mut fetcher = MockFetcher::new();
        fetcher.expect_get().never();
        (engine, fetcher)
    }

    fn signed_by_sk() -> Vec<SignatureDescriptor> {
        vec![
            SignatureDescriptor {
                id: "S-1".to_string(),
                certificate_subjects: vec!["cn=jana,c=sk".to_string()],
            },
            SignatureDescriptor {
                id: "S-2".to_string(),
                certificate_subjects: vec!["cn=peter,c=sk".to_string()],
            },
        ]
    }

    fn outcome(id: &str, indication: Indication, errors: Vec<String>) -> SignatureOutcome {
        SignatureOutcome {
            id: id.to_string(),
            signed_by: format!("Signer {}", id),
            indication,
            signing_time: Some(datetime!(2024-05-06 07:08:09 UTC)),
            qualification: "QESig".to_string(),
            chain: vec![format!("Signer {}", id), "Issuing CA".to_string(), "Root CA".to_string()],
            errors,
        }
    }

    fn validator(signature_count: usize, valid: usize) -> MockDocumentValidator {
        let mut validator = MockDocumentValidator::new();
        validator
            .expect_signatures()
            .withf(|_, config| *config == VerifierConfig::ignore_all())
            .times(1)
            .returning(|_, _| Ok(signed_by_sk()));
        validator
            .expect_validate()
            .withf(|_, config, depth| config.fetch_issuers && *depth == ValidationDepth::Timestamps)
            .times(1)
            .returning(move |_, _, _| {
                let mut signatures = vec![outcome("S-1", Indication::TotalPassed, Vec::new())];
                if valid < signature_count {
                    signatures.push(outcome(
                        "S-2",
                        Indication::Indeterminate,
                        vec!["Revocation data missing".to_string()],
                    ));
                } else {
                    signatures.push(outcome("S-2", Indication::Passed, Vec::new()));
                }
                Ok(ValidationOutcome {
                    signature_count,
                    valid_signature_count: valid,
                    signatures,
                })
            });
        validator
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported(Path::new("a.pdf")));
        assert!(is_supported(Path::new("A.XML")));
        assert!(is_supported(Path::new("bundle.asice")));
        assert!(is_supported(Path::new("bundle.sce")));
        assert!(!is_supported(Path::new("report.docx")));
        assert!(!is_supported(Path::new("pdf")));
    }

    #[test]
    fn test_unsupported_extension_is_unknown_without_validation() {
        let mut validator = MockDocumentValidator::new();
        validator.expect_signatures().never();
        validator.expect_validate().never();
        let (engine, fetcher) = untouched_trust();
        let trust = TrustLoader::new(source(), &engine, &fetcher);

        let mut channel = channel();
        let report = verify_document(&mut channel, &validator, &trust, Path::new("report.docx")).unwrap();

        assert_eq!(report.status, ValidationStatus::Unknown);
        assert_eq!(output(channel), "--RESULT--\nUNKNOWN\n--RESULT--\n");
    }

    #[test]
    fn test_no_countries_is_unsigned() {
        let mut validator = MockDocumentValidator::new();
        validator.expect_signatures().returning(|_, _| Ok(Vec::new()));
        validator.expect_validate().never();
        let (engine, fetcher) = untouched_trust();
        let trust = TrustLoader::new(source(), &engine, &fetcher);

        let mut channel = channel();
        let report = verify_document(&mut channel, &validator, &trust, Path::new("plain.pdf")).unwrap();

        assert_eq!(report.status, ValidationStatus::Unsigned);
        assert_eq!(output(channel), "--RESULT--\nUNSIGNED\n--RESULT--\n");
    }

    #[test]
    fn test_all_valid_is_signed() {
        let validator = validator(2, 2);
        let (engine, fetcher) = offline_trust();
        let trust = TrustLoader::new(source(), &engine, &fetcher);

        let report = validate(&validator, &trust, Path::new("contract.pdf")).unwrap();
        assert_eq!(report.status, ValidationStatus::Signed);
        assert_eq!(report.per_signature.len(), 2);
        assert!(report
            .per_signature
            .iter()
            .all(|s| s.validity == ValidityLabel::Valid));
    }

    #[test]
    fn test_partially_valid_is_invalid() {
        let validator = validator(2, 1);
        let (engine, fetcher) = offline_trust();
        let trust = TrustLoader::new(source(), &engine, &fetcher);

        let mut channel = channel();
        let report = verify_document(&mut channel, &validator, &trust, Path::new("contract.xml")).unwrap();

        assert_eq!(report.status, ValidationStatus::Invalid);
        assert_eq!(report.per_signature[1].validity, ValidityLabel::Indeterminate);

        let out = output(channel);
        assert!(out.starts_with("--RESULT--\nINVALID\n### t{Signed by} Signer S-1\n\n"));
        assert!(out.contains("**t{Validity}**: t{Indeterminate}\n\n"));
        assert!(out.contains("**t{Potential problems}**: \n\n1. Revocation data missing\n\n"));
    }

    #[test]
    fn test_corrupted_keystore_aborts_without_result() {
        let mut validator = MockDocumentValidator::new();
        validator.expect_signatures().returning(|_, _| Ok(signed_by_sk()));
        validator.expect_validate().never();
        let mut engine = MockTrustListEngine::new();
        engine
            .expect_open_keystore()
            .returning(|_, _| Err(EngineError::Failed("keystore password was incorrect".to_string())));
        let mut fetcher = MockFetcher::new();
        fetcher.expect_get().never();
        let trust = TrustLoader::new(source(), &engine, &fetcher);

        let mut channel = channel();
        let err = verify_document(&mut channel, &validator, &trust, Path::new("a.pdf")).unwrap_err();
        assert!(matches!(err, Error::TrustAnchorCorrupted(_)));
        assert!(output(channel).is_empty());
    }

    #[test]
    fn test_validation_library_failure() {
        let mut validator = MockDocumentValidator::new();
        validator
            .expect_signatures()
            .returning(|_, _| Err(EngineError::Failed("not a PDF".to_string())));
        let (engine, fetcher) = untouched_trust();
        let trust = TrustLoader::new(source(), &engine, &fetcher);

        let err = validate(&validator, &trust, Path::new("broken.pdf")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_render_signature() {
        let summary = SignatureSummary::from(&outcome("S-1", Indication::TotalPassed, Vec::new()));
        assert_eq!(
            render_signature(&summary),
            "### t{Signed by} Signer S-1\n\n\
             **t{Validity}**: t{Valid}\n\n\
             **t{Date and time}**: 2024-05-06T07:08:09Z\n\n\
             **t{Qualification}**: t{QESig}\n\n\
             **t{Chain of trust}**: Signer S-1 > Issuing CA > Root CA\n\n\
             \n\n"
        );

        let mut undated = summary;
        undated.signing_time = None;
        undated.problems = vec!["first".to_string(), "second".to_string()];
        let rendered = render_signature(&undated);
        assert!(rendered.contains("**t{Date and time}**: \n\n"));
        assert!(rendered.contains("1. first\n\n2. second\n\n"));
    }
}
