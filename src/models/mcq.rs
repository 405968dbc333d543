use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 选项标签（必须恰好是这四个）
pub const OPTION_LABELS: [&str; 4] = ["A", "B", "C", "D"];

/// 题目难度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    /// 宽松解析（大小写不敏感）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            "expert" => Some(Difficulty::Expert),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        };
        f.write_str(name)
    }
}

/// 通过校验、尚未编号的题目
///
/// 字段名与模型输出保持一致，序列化后可以被解析器原样读回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqDraft {
    pub question: String,
    pub options: BTreeMap<String, String>,
    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub topic: String,
    pub subtopic: String,
    pub tags: Vec<String>,
    pub learning_objective: String,
}

/// 题目来源信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// 来源章节
    pub source: String,
    /// 生成时间 (RFC 3339)
    pub created_date: String,
    pub ai_generated: bool,
    pub reviewed: bool,
    pub quality_score: f32,
}

/// 最终写入输出文件的题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mcq {
    /// `<科目>_<章节>_mcq_<序号>`，章节内唯一
    pub id: String,
    pub question_type: String,
    #[serde(flatten)]
    pub draft: McqDraft,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Mcq {
    pub fn new(id: String, draft: McqDraft, provenance: Provenance) -> Self {
        Self {
            id,
            question_type: "multiple_choice".to_string(),
            draft,
            provenance,
        }
    }

    /// 题目在章节内的序号（从 id 末尾解析）
    pub fn sequence(&self) -> Option<usize> {
        self.id.rsplit('_').next().and_then(|s| s.parse().ok())
    }
}

/// 生成题目 id
pub fn mcq_id(subject: &str, unit: &str, sequence: usize) -> String {
    format!("{}_{}_mcq_{:03}", slug(subject), slug(unit), sequence)
}

/// 转为小写并把非字母数字字符替换为下划线
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_underscore = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> McqDraft {
        McqDraft {
            question: "Q".to_string(),
            options: OPTION_LABELS
                .iter()
                .enumerate()
                .map(|(i, l)| (l.to_string(), (i + 1).to_string()))
                .collect(),
            correct_answer: "A".to_string(),
            explanation: "e".to_string(),
            difficulty: Difficulty::Easy,
            topic: "t".to_string(),
            subtopic: "s".to_string(),
            tags: vec!["t".to_string()],
            learning_objective: "Understand t".to_string(),
        }
    }

    #[test]
    fn test_mcq_id_format() {
        assert_eq!(
            mcq_id("chemistry_chapters", "ch7_ALCOHOLS, PHENOLS", 3),
            "chemistry_chapters_ch7_alcohols_phenols_mcq_003"
        );
    }

    #[test]
    fn test_sequence_from_id() {
        let mcq = Mcq::new(mcq_id("physics", "ch1", 12), draft(), provenance());
        assert_eq!(mcq.sequence(), Some(12));
    }

    #[test]
    fn test_serialized_layout_is_flat() {
        let mcq = Mcq::new(mcq_id("physics", "ch1", 1), draft(), provenance());
        let value = serde_json::to_value(&mcq).unwrap();
        assert_eq!(value["question"], "Q");
        assert_eq!(value["correct_answer"], "A");
        assert_eq!(value["difficulty"], "easy");
        assert_eq!(value["source"], "ch1.pdf");
        assert_eq!(value["question_type"], "multiple_choice");

        let back: Mcq = serde_json::from_value(value).unwrap();
        assert_eq!(back, mcq);
    }

    #[test]
    fn test_difficulty_parse_is_case_insensitive() {
        assert_eq!(Difficulty::parse(" Hard "), Some(Difficulty::Hard));
        assert_eq!(Difficulty::parse("EXPERT"), Some(Difficulty::Expert));
        assert_eq!(Difficulty::parse("trivial"), None);
    }

    fn provenance() -> Provenance {
        Provenance {
            source: "ch1.pdf".to_string(),
            created_date: "2024-09-11T00:00:00+00:00".to_string(),
            ai_generated: true,
            reviewed: false,
            quality_score: 0.9,
        }
    }
}
