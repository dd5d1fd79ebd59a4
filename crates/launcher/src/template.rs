// template.rs
// 对话模板：把多轮对话展开为带 require_loss 标记的文本片段（ChatML / MOSS 两种格式）。
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};
use serde_json::Value;
use std::io::{self, Write};

/// 对话中的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: String,
    /// 函数调用内容（role = func_call）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_call: Option<Value>,
    /// 函数返回内容（role = func_ret）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_ret: Option<Value>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            func_call: None,
            func_ret: None,
        }
    }
}

/// 模板展开后的文本片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub content: String,
    /// 是否参与损失计算
    pub require_loss: bool,
}

impl Segment {
    fn new(content: impl Into<String>, require_loss: bool) -> Self {
        Self {
            content: content.into(),
            require_loss,
        }
    }
}

/// 分词器的特殊token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub bos_token: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            bos_token: "<s>".to_string(),
        }
    }
}

/// 对话模板种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    ChatMl,
    Moss,
}

// 预置了模板的分词器
const TOKENIZER_TEMPLATES: &[(&str, TemplateKind)] = &[
    ("Qwen2Tokenizer", TemplateKind::ChatMl),
    ("Qwen2TokenizerFast", TemplateKind::ChatMl),
];

impl TemplateKind {
    /// 根据分词器类名查找预置模板
    pub fn for_tokenizer(tokenizer_class: &str) -> Result<Self> {
        TOKENIZER_TEMPLATES
            .iter()
            .find(|(name, _)| *name == tokenizer_class)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                Error::TemplateError(format!("分词器 {} 没有预置模板，请显式指定", tokenizer_class))
            })
    }

    /// 按模板展开对话
    pub fn prepare(
        &self,
        messages: &[Message],
        tokens: &SpecialTokens,
        add_generation_prompt: bool,
    ) -> Result<Vec<Segment>> {
        match self {
            TemplateKind::ChatMl => Ok(prepare_chatml(messages, tokens, add_generation_prompt)),
            TemplateKind::Moss => prepare_moss(messages, tokens, add_generation_prompt),
        }
    }
}

impl std::str::FromStr for TemplateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chatml" => Ok(TemplateKind::ChatMl),
            "moss" => Ok(TemplateKind::Moss),
            _ => TemplateKind::for_tokenizer(s),
        }
    }
}

const IM_START_ASSISTANT: &str = "<|im_start|>assistant\n";

/// 从对话对象中取出消息列表
pub fn messages_from_value(conversation: &Value, text_field: &str) -> Result<Vec<Message>> {
    let field = conversation
        .get(text_field)
        .ok_or_else(|| Error::TemplateError(format!("对话中缺少字段 '{}'", text_field)))?;
    Ok(serde_json::from_value(field.clone())?)
}

/// ChatML 格式：
///
/// ```text
/// {bos}<|im_start|>{role}\n{content}<|im_end|>\n ... [<|im_start|>assistant\n]
/// ```
///
/// 只有 assistant 的回复内容（含 `<|im_end|>`）计算损失。
pub fn prepare_chatml(
    messages: &[Message],
    tokens: &SpecialTokens,
    add_generation_prompt: bool,
) -> Vec<Segment> {
    let mut segments = vec![Segment::new(tokens.bos_token.as_str(), false)];
    for message in messages {
        if message.role == "assistant" {
            segments.push(Segment::new(IM_START_ASSISTANT, false));
            segments.push(Segment::new(format!("{}<|im_end|>", message.content), true));
            segments.push(Segment::new("\n", false));
        } else {
            segments.push(Segment::new(
                format!("<|im_start|>{}\n{}<|im_end|>\n", message.role, message.content),
                false,
            ));
        }
    }
    if add_generation_prompt {
        segments.push(Segment::new(IM_START_ASSISTANT, false));
    }
    segments
}

fn moss_end_token(role: &str) -> Option<&'static str> {
    let token = match role {
        "user" => "<|end_of_user|>",
        "system" => "<|end_of_system|>",
        "assistant" => "<|end_of_assistant|>",
        "func_call" => "<|end_of_func_call|>",
        "func_ret" => "<|end_of_func_ret|>",
        "thought" => "<|end_of_thought|>",
        "image" => "<|end_of_image|>",
        "audio" => "<|end_of_audio|>",
        "video" => "<|end_of_video|>",
        "moss" => "<|end_of_moss|>",
        _ => return None,
    };
    Some(token)
}

/// 与 Python `json.dumps` 默认参数一致的输出格式：
/// 分隔符为 `", "` 和 `": "`，非 ASCII 字符写成 `\uXXXX`。
struct PythonJsonFormatter;

impl Formatter for PythonJsonFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                let mut buf = [0u8; 4];
                writer.write_all(c.encode_utf8(&mut buf).as_bytes())?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// 按 Python `json.dumps` 的格式编码函数调用/返回内容
pub fn python_json_dumps(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PythonJsonFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(|e| Error::Other(format!("JSON 输出不是合法 UTF-8: {}", e)))
}

fn json_payload(payload: &Option<Value>) -> Result<String> {
    python_json_dumps(payload.as_ref().unwrap_or(&Value::Null))
}

/// MOSS 格式
///
/// 每轮 moss 回复以 `<|end_of_moss|>` 结束：除第一轮外，每条 user 消息前都会补上
/// 上一轮的 `<|end_of_moss|>`（计算损失），对话末尾再补一个。
pub fn prepare_moss(
    messages: &[Message],
    tokens: &SpecialTokens,
    add_generation_prompt: bool,
) -> Result<Vec<Segment>> {
    let end_of_moss = "<|end_of_moss|>";
    let mut segments = vec![Segment::new(tokens.bos_token.as_str(), false)];
    let mut first_user_message = true;

    for message in messages {
        let role = message.role.as_str();
        let end = moss_end_token(role)
            .ok_or_else(|| Error::TemplateError(format!("MOSS 模板不支持角色 '{}'", role)))?;
        match role {
            "user" => {
                let content = format!("<|im_start|>user\n{}{}\n", message.content, end);
                if first_user_message {
                    segments.push(Segment::new(content, false));
                    first_user_message = false;
                } else {
                    segments.push(Segment::new(end_of_moss, true));
                    segments.push(Segment::new(format!("\n{}", content), false));
                }
            }
            "assistant" => {
                segments.push(Segment::new(IM_START_ASSISTANT, false));
                segments.push(Segment::new(format!("{}{}", message.content, end), true));
                segments.push(Segment::new("\n", false));
            }
            "func_call" => {
                let payload = json_payload(&message.func_call)?;
                segments.push(Segment::new(format!("<|im_start|>func_call\n{}{}", payload, end), true));
                segments.push(Segment::new("\n", false));
            }
            "func_ret" => {
                let payload = json_payload(&message.func_ret)?;
                segments.push(Segment::new(format!("<|im_start|>func_ret\n{}{}\n", payload, end), false));
            }
            _ => {
                segments.push(Segment::new(
                    format!("<|im_start|>{}\n{}{}\n", role, message.content, end),
                    false,
                ));
            }
        }
    }

    segments.push(Segment::new(format!("{}\n", end_of_moss), true));
    if add_generation_prompt {
        segments.push(Segment::new(IM_START_ASSISTANT, false));
    }
    Ok(segments)
}
