//! 宿主通信协议实现
//!
//! 一次交换由重复的标记行界定：
//! ```text
//! --PROMPT--
//! password"Please provide the key password."("")
//! --PROMPT--
//! ```
//! 宿主用同样的帧格式应答，帧中间的那一行就是答案。`RESULT` 帧只由本进程写出，
//! 不等待应答。通道任意时刻最多只有一个未完成的请求。
//!
//! 读取没有超时：宿主不应答时进程会一直阻塞。

use crate::error::{Error, Result};
use std::fmt;
use std::io::{BufRead, Write};
use tracing::debug;

/// 帧标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Prompt,
    GetOption,
    Result,
}

impl Tag {
    /// 标记行文本
    pub fn line(&self) -> &'static str {
        match self {
            Tag::Prompt => "--PROMPT--",
            Tag::GetOption => "--GETOPTION--",
            Tag::Result => "--RESULT--",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.line())
    }
}

/// 提示类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    Password,
    Save,
    Single,
    /// 宿主支持但本进程不特殊处理的类型
    Other(String),
}

impl PromptKind {
    pub fn as_str(&self) -> &str {
        match self {
            PromptKind::Password => "password",
            PromptKind::Save => "save",
            PromptKind::Single => "single",
            PromptKind::Other(kind) => kind,
        }
    }

    pub fn parse(kind: &str) -> Self {
        match kind {
            "password" => PromptKind::Password,
            "save" => PromptKind::Save,
            "single" => PromptKind::Single,
            other => PromptKind::Other(other.to_string()),
        }
    }
}

/// 选择型提示的一个选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOption {
    pub id: String,
    pub label: String,
}

/// 一次提示请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub kind: PromptKind,
    pub question: String,
    pub default: String,
    /// 仅选择型提示携带
    pub options: Option<Vec<PromptOption>>,
}

impl PromptRequest {
    pub fn new(kind: PromptKind, question: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            kind,
            question: question.into(),
            default: default.into(),
            options: None,
        }
    }

    pub fn with_options(mut self, options: Vec<PromptOption>) -> Self {
        self.options = Some(options);
        self
    }

    /// 编码为载荷行：`kind"question"("default")[id"label" id"label"]`
    pub fn encode(&self) -> String {
        let mut payload = format!(
            "{}\"{}\"(\"{}\")",
            self.kind.as_str(),
            self.question,
            self.default
        );
        if let Some(options) = &self.options {
            let prepared: Vec<String> = options
                .iter()
                .map(|o| format!("{}\"{}\"", o.id, o.label))
                .collect();
            payload.push('[');
            payload.push_str(&prepared.join(" "));
            payload.push(']');
        }
        payload
    }

    /// 解析载荷行。格式不支持转义，问题中不能出现 `"("`，默认值中不能出现 `")`。
    pub fn parse(payload: &str) -> Result<Self> {
        let malformed = || Error::Protocol(payload.to_string());

        let kind_end = payload.find('"').ok_or_else(malformed)?;
        let kind = &payload[..kind_end];
        let rest = &payload[kind_end + 1..];

        let question_end = rest.find("\"(\"").ok_or_else(malformed)?;
        let question = &rest[..question_end];
        let rest = &rest[question_end + 3..];

        let default_end = rest.find("\")").ok_or_else(malformed)?;
        let default = &rest[..default_end];
        let rest = &rest[default_end + 2..];

        let options = if rest.is_empty() {
            None
        } else {
            let inner = rest
                .strip_prefix('[')
                .and_then(|r| r.strip_suffix(']'))
                .ok_or_else(malformed)?;
            Some(parse_options(inner).ok_or_else(malformed)?)
        };

        Ok(Self {
            kind: PromptKind::parse(kind),
            question: question.to_string(),
            default: default.to_string(),
            options,
        })
    }
}

fn parse_options(mut inner: &str) -> Option<Vec<PromptOption>> {
    let mut options = Vec::new();
    loop {
        inner = inner.trim_start_matches(' ');
        if inner.is_empty() {
            return Some(options);
        }
        let id_end = inner.find('"')?;
        let id = &inner[..id_end];
        let rest = &inner[id_end + 1..];
        let label_end = rest.find('"')?;
        options.push(PromptOption {
            id: id.to_string(),
            label: rest[..label_end].to_string(),
        });
        inner = &rest[label_end + 1..];
    }
}

/// 写出一个完整的帧并刷新
pub fn write_frame<W: Write>(writer: &mut W, tag: Tag, payload: &str) -> Result<()> {
    writeln!(writer, "{}", tag.line())?;
    writeln!(writer, "{}", payload)?;
    writeln!(writer, "{}", tag.line())?;
    writer.flush()?;
    Ok(())
}

/// 读取宿主对 `tag` 的应答
///
/// 第一次遇到标记行时，下一行即为答案；答案捕获后再遇到标记行时结束。
/// 输入流在此之前结束视为用户取消。
pub fn read_answer<R: BufRead>(reader: &mut R, tag: Tag) -> Result<String> {
    let mut answer: Option<String> = None;
    let mut is_answer = false;
    let mut buf = String::new();

    loop {
        buf.clear();
        if reader.read_line(&mut buf)? == 0 {
            return Err(Error::UserCancelled(format!(
                "Host closed the stream before completing the {} exchange.",
                tag
            )));
        }
        let line = buf.trim();

        if is_answer {
            answer = Some(line.to_string());
            is_answer = false;
        }

        if line == tag.line() {
            match answer.take() {
                None => is_answer = true,
                Some(captured) => return Ok(captured),
            }
        }
    }
}

/// 同步请求/应答通道
pub struct Channel<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> Channel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// 发起提示并等待应答
    ///
    /// 空答案视为无应答，`password` 除外：它原样返回（可能为空串）。
    pub fn prompt(&mut self, request: &PromptRequest) -> Result<Option<String>> {
        debug!(kind = request.kind.as_str(), "Prompting host");
        write_frame(&mut self.writer, Tag::Prompt, &request.encode())?;
        let answer = read_answer(&mut self.reader, Tag::Prompt)?;

        if request.kind == PromptKind::Password || !answer.is_empty() {
            Ok(Some(answer))
        } else {
            Ok(None)
        }
    }

    /// 请求密码，无应答时得到空密码
    pub fn prompt_password(&mut self, question: &str) -> Result<String> {
        let request = PromptRequest::new(PromptKind::Password, question, "");
        Ok(self.prompt(&request)?.unwrap_or_default())
    }

    /// 查询宿主配置项，未配置时返回 `None`
    pub fn option(&mut self, id: &str) -> Result<Option<String>> {
        debug!(option = id, "Querying host option");
        write_frame(&mut self.writer, Tag::GetOption, id)?;
        let answer = read_answer(&mut self.reader, Tag::GetOption)?;
        Ok(if answer.is_empty() { None } else { Some(answer) })
    }

    /// 输出操作结果帧
    pub fn result(&mut self, payload: &str) -> Result<()> {
        write_frame(&mut self.writer, Tag::Result, payload)
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}
