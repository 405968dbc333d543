//! 生成指令模板
//!
//! 首次调用使用完整指令，之后使用续写指令（告知已有题目数，要求换新的知识点）

const OUTPUT_FORMAT: &str = r#"Output format: a valid JSON array and nothing else.
[
  {
    "question": "Question text, formulas in LaTeX such as $x^2$",
    "options": {"A": "...", "B": "...", "C": "...", "D": "..."},
    "correct_answer": "A",
    "explanation": "Why the answer is correct",
    "difficulty": "easy | medium | hard",
    "topic": "main topic",
    "subtopic": "specific subtopic",
    "tags": ["keyword"],
    "learning_objective": "What the question checks"
  }
]"#;

const RULES: &str = "Rules:
- Exactly four options labelled A, B, C and D, one of them correct
- Mix easy, medium and hard questions
- Write mathematics in LaTeX and escape every backslash for JSON (\\\\frac, \\\\sqrt)
- Give a short but complete explanation for each answer";

/// 首次调用的完整指令
pub fn full_instruction(subject: &str, unit: &str, count: usize) -> String {
    format!(
        "You are an experienced teacher writing exam questions for {subject}.\n\
         Read the attached chapter \"{unit}\" and write {count} multiple choice questions \
         that together cover the whole chapter.\n\n\
         {RULES}\n\n\
         {OUTPUT_FORMAT}\n\n\
         Return ONLY the JSON array.",
        subject = display_subject(subject),
    )
}

/// 后续调用的续写指令
pub fn continuation_instruction(subject: &str, unit: &str, count: usize, existing: usize) -> String {
    format!(
        "You are an experienced teacher writing exam questions for {subject}.\n\
         {existing} questions have already been written for the attached chapter \"{unit}\".\n\
         Write {count} NEW multiple choice questions on topics and subtopics \
         that the earlier questions did not cover. Do not repeat earlier questions.\n\n\
         {RULES}\n\n\
         {OUTPUT_FORMAT}\n\n\
         Return ONLY the JSON array.",
        subject = display_subject(subject),
    )
}

/// `chemistry_chapters` → `Chemistry`
pub fn display_subject(subject: &str) -> String {
    subject
        .trim_end_matches("_chapters")
        .split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_subject() {
        assert_eq!(display_subject("chemistry_chapters"), "Chemistry");
        assert_eq!(display_subject("computer_science"), "Computer Science");
    }

    #[test]
    fn test_instructions_carry_counts() {
        let full = full_instruction("physics_chapters", "ch3_motion", 5);
        assert!(full.contains("write 5 multiple choice"));
        assert!(full.contains("\"correct_answer\""));

        let more = continuation_instruction("physics_chapters", "ch3_motion", 2, 10);
        assert!(more.contains("10 questions have already been written"));
        assert!(more.contains("Write 2 NEW"));
    }
}
