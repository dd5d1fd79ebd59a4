use launcher::data_preparator::{ByteTokenizer, DataPreparator, IGNORE_INDEX};
use launcher::template::TemplateKind;
use serde_json::json;

/// 用 ChatML 和 MOSS 模板展开同一段对话，并统计参与损失计算的 token 数
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let conversation = json!({
        "history": [
            {"role": "system", "content": "You are a helpful assistant."},
            {"role": "user", "content": "什么是张量并行？"},
            {"role": "assistant", "content": "把单层的权重按列或按行切到多张卡上计算。"}
        ]
    });

    for template in [TemplateKind::ChatMl, TemplateKind::Moss] {
        let preparator = DataPreparator::new(ByteTokenizer::default(), template);
        let sample = preparator.tokenize_conversation(&conversation)?;
        let supervised = sample.labels.iter().filter(|&&l| l != IGNORE_INDEX).count();
        println!(
            "{:?}: 共 {} 个 token，其中 {} 个参与损失计算",
            template,
            sample.len(),
            supervised
        );
    }
    Ok(())
}
