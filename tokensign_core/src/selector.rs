//! 签名证书选择
//!
//! 只有一把私钥时直接使用；否则为每把私钥生成可读标签，通过 `single` 提示让宿主选择。

use crate::certificate::SubjectFields;
use crate::error::{Error, Result};
use crate::protocol::{Channel, PromptKind, PromptOption, PromptRequest};
use crate::types::KeyEntry;
use std::io::{BufRead, Write};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, warn};

const CHOICE_QUESTION: &str = "Please pick a certificate for signing";

fn calendar_date(at: OffsetDateTime) -> Option<String> {
    at.format(format_description!("[year]-[month]-[day]")).ok()
}

/// 生成私钥的选择标签，证书无法解析时退回序列号
pub fn key_label(key: &KeyEntry) -> String {
    let label = SubjectFields::from_der(&key.certificate.der).and_then(|fields| {
        let not_before = calendar_date(key.not_before())?;
        let not_after = calendar_date(key.not_after())?;
        Some(format!(
            "{}, {} {}, {} ({} - {})",
            fields.name, fields.locality, fields.street, fields.country, not_before, not_after
        ))
    });

    label.unwrap_or_else(|| format!("Certificate SN: {}", key.certificate.serial_hex()))
}

/// 选择用于签名的私钥
pub fn select_key<R: BufRead, W: Write>(
    channel: &mut Channel<R, W>,
    keys: Vec<KeyEntry>,
) -> Result<KeyEntry> {
    if keys.is_empty() {
        warn!("Token holds no usable keys");
        return Err(Error::KeySelection);
    }

    if keys.len() == 1 {
        debug!("Single key available, selecting it without prompting");
        return keys.into_iter().next().ok_or(Error::KeySelection);
    }

    let options = keys
        .iter()
        .map(|key| PromptOption {
            id: key.opaque_id.clone(),
            label: key_label(key),
        })
        .collect();
    let request = PromptRequest::new(PromptKind::Single, CHOICE_QUESTION, "").with_options(options);

    let chosen = channel.prompt(&request)?.ok_or(Error::KeySelection)?;
    keys.into_iter()
        .find(|key| key.opaque_id == chosen)
        .ok_or(Error::KeySelection)
}
