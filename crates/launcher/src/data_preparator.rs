// data_preparator.rs
// 数据准备器，负责把对话按模板展开、分词，并生成 input_ids / labels / attention_mask。
use crate::error::Result;
use crate::template::{messages_from_value, SpecialTokens, TemplateKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

/// 不参与损失计算的标签值
pub const IGNORE_INDEX: i64 = -100;

/// 分词器接口，真实分词器由外部提供
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Vec<u32>;

    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens::default()
    }
}

/// 按 UTF-8 字节分词，用于演示和测试
#[derive(Debug, Clone, Default)]
pub struct ByteTokenizer {
    pub special_tokens: SpecialTokens,
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.bytes().map(u32::from).collect()
    }

    fn special_tokens(&self) -> SpecialTokens {
        self.special_tokens.clone()
    }
}

/// 分词后的训练样本
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedSample {
    pub input_ids: Vec<u32>,
    pub labels: Vec<i64>,
    pub attention_mask: Vec<u8>,
}

impl TokenizedSample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// 数据准备器
pub struct DataPreparator<T: Tokenizer> {
    pub tokenizer: T,
    pub template: TemplateKind,
    /// 对话字段名
    pub text_field: String,
    pub add_generation_prompt: bool,
}

impl<T: Tokenizer> DataPreparator<T> {
    pub fn new(tokenizer: T, template: TemplateKind) -> Self {
        Self {
            tokenizer,
            template,
            text_field: "history".to_string(),
            add_generation_prompt: false,
        }
    }

    pub fn with_text_field(mut self, text_field: impl Into<String>) -> Self {
        self.text_field = text_field.into();
        self
    }

    pub fn with_generation_prompt(mut self, add_generation_prompt: bool) -> Self {
        self.add_generation_prompt = add_generation_prompt;
        self
    }

    /// 分词单条对话
    pub fn tokenize_conversation(&self, conversation: &Value) -> Result<TokenizedSample> {
        let messages = messages_from_value(conversation, &self.text_field)?;
        let segments = self.template.prepare(
            &messages,
            &self.tokenizer.special_tokens(),
            self.add_generation_prompt,
        )?;

        let mut sample = TokenizedSample::default();
        for segment in &segments {
            let ids = self.tokenizer.encode(&segment.content);
            if segment.require_loss {
                sample.labels.extend(ids.iter().map(|&id| i64::from(id)));
            } else {
                sample.labels.extend(std::iter::repeat(IGNORE_INDEX).take(ids.len()));
            }
            sample.attention_mask.extend(std::iter::repeat(1u8).take(ids.len()));
            sample.input_ids.extend(ids);
        }
        Ok(sample)
    }

    /// 逐行转换 JSONL 对话文件，空行跳过，返回写出的样本数
    pub fn prepare_jsonl<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> Result<usize> {
        let mut written = 0;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let conversation: Value = serde_json::from_str(&line).map_err(|e| {
                warn!(line = line_no + 1, "无法解析对话");
                e
            })?;
            let sample = self.tokenize_conversation(&conversation)?;
            debug!(line = line_no + 1, tokens = sample.len(), "样本已分词");
            serde_json::to_writer(&mut writer, &sample)?;
            writer.write_all(b"\n")?;
            written += 1;
        }
        writer.flush()?;
        info!(samples = written, "对话数据准备完成");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tokenize_masks_non_loss_segments() {
        let tokenizer = ByteTokenizer {
            special_tokens: SpecialTokens { bos_token: "B".to_string() },
        };
        let preparator = DataPreparator::new(tokenizer, TemplateKind::ChatMl);
        let conversation = json!({"history": [
            {"role": "user", "content": "q"},
            {"role": "assistant", "content": "a"}
        ]});

        let sample = preparator.tokenize_conversation(&conversation).unwrap();
        assert_eq!(sample.input_ids.len(), sample.labels.len());
        assert_eq!(sample.input_ids.len(), sample.attention_mask.len());
        assert!(sample.attention_mask.iter().all(|&m| m == 1));

        let supervised: Vec<u8> = sample
            .labels
            .iter()
            .filter(|&&l| l != IGNORE_INDEX)
            .map(|&l| l as u8)
            .collect();
        assert_eq!(String::from_utf8(supervised).unwrap(), "a<|im_end|>");
        assert_eq!(sample.labels[0], IGNORE_INDEX);
    }

    #[test]
    fn test_prepare_jsonl() {
        let preparator = DataPreparator::new(ByteTokenizer::default(), TemplateKind::Moss)
            .with_text_field("turns");
        let input = concat!(
            r#"{"turns": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "yo"}]}"#,
            "\n\n",
            r#"{"turns": [{"role": "user", "content": "bye"}]}"#,
            "\n"
        );
        let mut output = Vec::new();
        let count = preparator.prepare_jsonl(input.as_bytes(), &mut output).unwrap();
        assert_eq!(count, 2);

        let text = String::from_utf8(output).unwrap();
        let samples: Vec<TokenizedSample> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.labels.len() == s.input_ids.len()));
    }

    #[test]
    fn test_prepare_jsonl_bad_line() {
        let preparator = DataPreparator::new(ByteTokenizer::default(), TemplateKind::ChatMl);
        let mut output = Vec::new();
        assert!(preparator.prepare_jsonl("not json\n".as_bytes(), &mut output).is_err());
    }
}
