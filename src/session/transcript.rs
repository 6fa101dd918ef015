use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    Human,
    Ai,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Human => "Human",
            Speaker::Ai => "AI",
        }
    }

    fn prefix(&self) -> String {
        format!("{}: ", self.label())
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One exchange as stored in `chat_history.txt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub prompt: String,
    pub reply: String,
}

impl TurnRecord {
    pub fn new(prompt: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reply: reply.into(),
        }
    }

    /// `Human: <prompt>\nAI: <reply>\n\n`
    pub fn render(&self) -> String {
        format!(
            "{}{}\n{}{}\n\n",
            Speaker::Human.prefix(),
            self.prompt,
            Speaker::Ai.prefix(),
            self.reply
        )
    }

    /// Split a transcript back into records.
    ///
    /// A record starts at a `Human: ` line that opens the file or follows the
    /// blank separator line. Prompts and replies may span several lines, and
    /// a reply line that merely starts with `Human: ` stays in its reply.
    pub fn parse_all(content: &str) -> Vec<TurnRecord> {
        let human = Speaker::Human.prefix();
        let ai = format!("\n{}", Speaker::Ai.prefix());

        let mut chunks: Vec<String> = Vec::new();
        let mut at_boundary = true;
        for line in content.split_inclusive('\n') {
            match line.strip_prefix(human.as_str()) {
                Some(rest) if at_boundary => chunks.push(rest.to_string()),
                _ => {
                    if let Some(chunk) = chunks.last_mut() {
                        chunk.push_str(line);
                    }
                }
            }
            at_boundary = line == "\n";
        }

        chunks
            .into_iter()
            .map(|chunk| match chunk.find(&ai) {
                Some(split) => TurnRecord {
                    prompt: chunk[..split].to_string(),
                    reply: chunk[split + ai.len()..]
                        .trim_end_matches('\n')
                        .to_string(),
                },
                None => TurnRecord {
                    prompt: chunk.trim_end_matches('\n').to_string(),
                    reply: String::new(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_format() {
        let record = TurnRecord::new("Hello", "Hi there");
        assert_eq!(record.render(), "Human: Hello\nAI: Hi there\n\n");
    }

    #[test]
    fn test_parse_multiline_reply() {
        let content = format!(
            "{}{}",
            TurnRecord::new("Hello", "Hi").render(),
            TurnRecord::new("List two things", "1. one\n2. two").render()
        );

        let records = TurnRecord::parse_all(&content);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], TurnRecord::new("Hello", "Hi"));
        assert_eq!(records[1].reply, "1. one\n2. two");
    }

    #[test]
    fn test_reply_with_speaker_labels_stays_one_record() {
        let content = format!(
            "{}{}",
            TurnRecord::new("Hello", "Hi!\nHuman: what next?\nAI: nothing").render(),
            TurnRecord::new("Bye", "See you").render()
        );

        let records = TurnRecord::parse_all(&content);
        assert_eq!(
            records,
            vec![
                TurnRecord::new("Hello", "Hi!\nHuman: what next?\nAI: nothing"),
                TurnRecord::new("Bye", "See you"),
            ]
        );
    }

    #[test]
    fn test_parse_empty() {
        assert!(TurnRecord::parse_all("").is_empty());
    }
}
