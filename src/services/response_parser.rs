//! 响应解析与修复 - 业务能力层
//!
//! ## 职责
//!
//! 把模型回复的原始文本转换为通过校验的题目列表。
//!
//! 按顺序尝试以下策略，第一个成功的生效：
//! 1. 去掉代码块标记后整体解析
//! 2. 截取第一个 `[` 到最后一个 `]` 之间的内容解析
//! 3. 轻度修复：删除 `]`/`}` 前多余的逗号，转义非法的反斜杠
//! 4. 抢救：截断到最后一条完整记录，补上 `]`
//!
//! 文本中完全没有 `[` 时返回 `UnrecoverableFormat`；
//! 有 `[` 但所有策略都失败时返回空结果。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::mcq::{Difficulty, McqDraft, OPTION_LABELS};
use crate::utils::logging::truncate_text;

static FENCE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").ok());

/// 生效的解析策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Direct,
    Slice,
    Repair,
    Salvage,
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStrategy::Direct => "直接解析",
            ParseStrategy::Slice => "截取数组",
            ParseStrategy::Repair => "轻度修复",
            ParseStrategy::Salvage => "截断抢救",
        };
        f.write_str(name)
    }
}

/// 一次回复的解析结果
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub items: Vec<McqDraft>,
    /// 未通过校验被丢弃的记录数
    pub dropped: usize,
    /// 没有任何策略成功时为 `None`
    pub strategy: Option<ParseStrategy>,
}

type Strategy = fn(&str) -> Option<Vec<Value>>;

const STRATEGIES: [(ParseStrategy, Strategy); 4] = [
    (ParseStrategy::Direct, parse_direct),
    (ParseStrategy::Slice, parse_slice),
    (ParseStrategy::Repair, parse_repaired),
    (ParseStrategy::Salvage, parse_salvaged),
];

/// 解析模型回复
pub fn parse_response(raw: &str) -> AppResult<ParsedBatch> {
    if !raw.contains('[') {
        return Err(AppError::UnrecoverableFormat {
            excerpt: truncate_text(raw.trim(), 120),
        });
    }

    for (strategy, run) in STRATEGIES {
        if let Some(records) = run(raw) {
            debug!("解析策略生效: {}，共 {} 条记录", strategy, records.len());
            let (items, dropped) = validate_records(&records);
            return Ok(ParsedBatch {
                items,
                dropped,
                strategy: Some(strategy),
            });
        }
    }

    warn!("⚠️ 所有解析策略均失败: {}", truncate_text(raw.trim(), 120));
    Ok(ParsedBatch::default())
}

// ========== 解析策略 ==========

fn parse_direct(raw: &str) -> Option<Vec<Value>> {
    parse_array(strip_fences(raw))
}

fn parse_slice(raw: &str) -> Option<Vec<Value>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    parse_array(&raw[start..=end])
}

fn parse_repaired(raw: &str) -> Option<Vec<Value>> {
    let start = raw.find('[')?;
    let body = match raw.rfind(']') {
        Some(end) if end > start => &raw[start..=end],
        _ => &raw[start..],
    };
    parse_array(&repair(body))
}

fn parse_salvaged(raw: &str) -> Option<Vec<Value>> {
    let start = raw.find('[')?;
    let body = &raw[start..];
    // 从最后一条完整记录往前逐个尝试
    record_ends(body).into_iter().rev().find_map(|end| {
        let mut candidate = body[..=end].to_string();
        candidate.push(']');
        parse_array(&repair(&candidate))
    })
}

fn parse_array(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Array(records)) => Some(records),
        _ => None,
    }
}

/// 取第一个代码块的内容；没有代码块时原样返回
fn strip_fences(raw: &str) -> &str {
    FENCE_RE
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim()
}

/// 字符串感知的轻度修复
///
/// - 删除紧跟 `]` 或 `}` 之前的逗号
/// - 字符串内非法的转义（如 LaTeX 的 `\sqrt`）改为 `\\`
fn repair(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            match c {
                '\\' => {
                    let next = chars.get(i + 1).copied();
                    if is_valid_escape(&chars, i) {
                        out.push('\\');
                        if let Some(n) = next {
                            out.push(n);
                        }
                        i += 2;
                        continue;
                    }
                    out.push_str("\\\\");
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                _ => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                ',' => {
                    let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                    if !matches!(next, Some(']') | Some('}')) {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            }
        }
        i += 1;
    }
    out
}

fn is_valid_escape(chars: &[char], backslash: usize) -> bool {
    match chars.get(backslash + 1) {
        Some('"') | Some('\\') | Some('/') | Some('b') | Some('f') | Some('n') | Some('r')
        | Some('t') => true,
        Some('u') => {
            let hex = &chars[(backslash + 2).min(chars.len())..(backslash + 6).min(chars.len())];
            hex.len() == 4 && hex.iter().all(|c| c.is_ascii_hexdigit())
        }
        _ => false,
    }
}

/// 数组第一层每条完整记录的结束位置（字节下标）
///
/// `body` 以 `[` 开头；遇到数组自身的 `]` 即停止，之后的文字不参与
fn record_ends(body: &str) -> Vec<usize> {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut ends = Vec::new();

    for (idx, c) in body.char_indices().skip(1) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    ends.push(idx);
                }
                if depth < 0 {
                    break;
                }
            }
            ']' if depth == 0 => break,
            _ => {}
        }
    }
    ends
}

// ========== 记录校验 ==========

fn validate_records(records: &[Value]) -> (Vec<McqDraft>, usize) {
    let mut items = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for (idx, record) in records.iter().enumerate() {
        match validate_record(record) {
            Ok(item) => items.push(item),
            Err(reason) => {
                warn!("⚠️ 丢弃第 {} 条记录: {}", idx + 1, reason);
                dropped += 1;
            }
        }
    }
    (items, dropped)
}

fn validate_record(record: &Value) -> Result<McqDraft, String> {
    let obj = record
        .as_object()
        .ok_or_else(|| "记录不是 JSON 对象".to_string())?;

    let question = obj
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| "缺少题干".to_string())?
        .to_string();

    let options = parse_options(obj.get("options"))?;

    let correct_answer = obj
        .get("correct_answer")
        .and_then(Value::as_str)
        .and_then(normalize_label)
        .ok_or_else(|| "正确答案缺失或无效".to_string())?;
    if !options.contains_key(&correct_answer) {
        return Err(format!("正确答案 {} 不在选项中", correct_answer));
    }

    let topic = text_field(obj.get("topic")).unwrap_or_else(|| "General".to_string());
    let difficulty = obj
        .get("difficulty")
        .and_then(Value::as_str)
        .and_then(Difficulty::parse)
        .unwrap_or_default();

    let tags: Vec<String> = obj
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let tags = if tags.is_empty() {
        vec![topic.clone()]
    } else {
        tags
    };

    let learning_objective = text_field(obj.get("learning_objective"))
        .unwrap_or_else(|| format!("Understand {}", topic));

    Ok(McqDraft {
        question,
        options,
        correct_answer,
        explanation: text_field(obj.get("explanation")).unwrap_or_default(),
        difficulty,
        subtopic: text_field(obj.get("subtopic")).unwrap_or_default(),
        topic,
        tags,
        learning_objective,
    })
}

/// 选项必须恰好是 A/B/C/D；也接受四个元素的数组
fn parse_options(value: Option<&Value>) -> Result<BTreeMap<String, String>, String> {
    let options: BTreeMap<String, String> = match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.trim().to_uppercase(), value_text(v)))
            .collect(),
        Some(Value::Array(list)) if list.len() == OPTION_LABELS.len() => OPTION_LABELS
            .iter()
            .zip(list)
            .map(|(label, v)| (label.to_string(), value_text(v)))
            .collect(),
        _ => return Err("缺少选项".to_string()),
    };

    let labels_ok = options.len() == OPTION_LABELS.len()
        && OPTION_LABELS.iter().all(|l| options.contains_key(*l));
    if !labels_ok {
        let keys: Vec<_> = options.keys().cloned().collect();
        return Err(format!("选项标签必须是 A/B/C/D，实际为 {:?}", keys));
    }
    Ok(options)
}

/// `"a"`、`"A)"`、`"A. xxx"` 都视为 `A`
fn normalize_label(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    if OPTION_LABELS.contains(&upper.as_str()) {
        return Some(upper);
    }
    let mut chars = upper.chars();
    let first = chars.next()?.to_string();
    let second = chars.next()?;
    if OPTION_LABELS.contains(&first.as_str()) && !second.is_alphanumeric() {
        Some(first)
    } else {
        None
    }
}

fn text_field(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
