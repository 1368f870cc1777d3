//! Line-oriented transcript persistence
//!
//! Transcripts are append-only text files. Each message is one line of the
//! form `Role:text`, and a completed conversation is terminated by a line
//! containing only `####`. Message text is flattened to a single line before
//! writing so the format stays parseable.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::agent::AgentRole;
use crate::error::EngineError;

use super::{Conversation, Message};

/// Conversation terminator line
pub const CONVERSATION_SENTINEL: &str = "####";

enum Sink {
    File(BufWriter<File>),
    Discard,
}

/// Appends messages to a transcript file as they are produced, so a crashed
/// run leaves behind every completed turn.
pub struct TranscriptWriter {
    sink: Sink,
}

impl TranscriptWriter {
    /// Open a transcript for appending, creating it if missing.
    pub fn append(path: &Path) -> Result<Self, EngineError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
        })
    }

    /// A writer that drops everything, for in-memory runs and tests.
    pub fn discard() -> Self {
        Self {
            sink: Sink::Discard,
        }
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), EngineError> {
        self.write_line(&format_message(message))
    }

    /// Mark the current conversation complete. The sentinel is what makes a
    /// conversation visible to the parser, so it is flushed immediately.
    pub fn end_conversation(&mut self) -> Result<(), EngineError> {
        self.write_line(CONVERSATION_SENTINEL)?;
        if let Sink::File(writer) = &mut self.sink {
            writer.flush()?;
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), EngineError> {
        match &mut self.sink {
            Sink::File(writer) => {
                writeln!(writer, "{}", line)?;
                Ok(())
            }
            Sink::Discard => Ok(()),
        }
    }
}

fn format_message(message: &Message) -> String {
    format!("{}:{}", message.role.as_str(), flatten(&message.text))
}

/// Collapse a multi-line utterance onto one line.
fn flatten(text: &str) -> String {
    text.replace("\n\n", "\n").replace('\n', " ")
}

/// Render a finished conversation in transcript form, sentinel included.
pub fn serialize_conversation(conv: &Conversation) -> String {
    let mut out = String::new();
    for message in conv.messages() {
        out.push_str(&format_message(message));
        out.push('\n');
    }
    out.push_str(CONVERSATION_SENTINEL);
    out.push('\n');
    out
}

/// Parse a transcript file's content back into conversations.
///
/// Only sentinel-terminated conversations are returned; a trailing block
/// with no sentinel is a partial conversation from an interrupted run and
/// is dropped. Lines that do not match `Role:text` are rejected, and the
/// stored role is mapped back onto participant ids via the run's
/// testee/partner pairing (opener roles keep their role name as the id).
pub fn parse_transcript(
    content: &str,
    testee_id: &str,
    partner_id: &str,
) -> Result<Vec<Conversation>, EngineError> {
    let mut conversations = Vec::new();
    let mut current = Conversation::new(testee_id, partner_id);

    for (line_nbr, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if line.trim() == CONVERSATION_SENTINEL {
            conversations.push(current);
            current = Conversation::new(testee_id, partner_id);
            continue;
        }

        let (role_str, text) = line.split_once(':').ok_or_else(|| {
            EngineError::Transcript(format!(
                "Malformed transcript line {}: '{}'",
                line_nbr + 1,
                line
            ))
        })?;
        let role = AgentRole::parse(role_str).ok_or_else(|| {
            EngineError::Transcript(format!(
                "Unknown role '{}' on transcript line {}",
                role_str,
                line_nbr + 1
            ))
        })?;
        let agent_id = match role {
            AgentRole::Testee => testee_id.to_string(),
            AgentRole::OtherAgent => partner_id.to_string(),
            AgentRole::Generator | AgentRole::QuestionGenerator => role.as_str().to_string(),
        };
        current.inject_message(text, agent_id, role);
    }

    Ok(conversations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Speaker;
    use std::fs;
    use tempfile::tempdir;

    fn sample_conversation() -> Conversation {
        let mut conv = Conversation::new("blenderbot90m", "partner-bot");
        conv.push(Message::new(
            "What do you do for a living?",
            "question_generator",
            AgentRole::QuestionGenerator,
        ));
        conv.push(Message::new(
            "I fix bicycles.",
            "partner-bot",
            AgentRole::OtherAgent,
        ));
        conv.push(Message::new(
            "That sounds rewarding!",
            "blenderbot90m",
            AgentRole::Testee,
        ));
        conv
    }

    #[test]
    fn serializes_roles_and_sentinel() {
        let text = serialize_conversation(&sample_conversation());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "question_generator:What do you do for a living?"
        );
        assert_eq!(lines[1], "Other agent:I fix bicycles.");
        assert_eq!(lines[2], "Testee:That sounds rewarding!");
        assert_eq!(lines[3], "####");
    }

    #[test]
    fn round_trips_through_parse() {
        let conv = sample_conversation();
        let text = serialize_conversation(&conv);
        let parsed = parse_transcript(&text, "blenderbot90m", "partner-bot").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].messages(), conv.messages());
    }

    #[test]
    fn drops_unterminated_tail() {
        let text = "Testee:hello\nOther agent:hi\n####\nTestee:interrupted here\n";
        let parsed = parse_transcript(text, "t", "p").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].len(), 2);
    }

    #[test]
    fn rejects_malformed_line() {
        let err = parse_transcript("no separator here\n####\n", "t", "p").unwrap_err();
        assert!(matches!(err, EngineError::Transcript(_)));
    }

    #[test]
    fn rejects_unknown_role() {
        let err = parse_transcript("Referee:hm\n####\n", "t", "p").unwrap_err();
        assert!(matches!(err, EngineError::Transcript(_)));
    }

    #[test]
    fn parsing_replays_turns_through_the_cursor() {
        // The opener never owns a turn; the single live testee turn hands
        // the cursor to the partner.
        let parsed = parse_transcript("Generator:howdy\nTestee:hello\n####\n", "t", "p").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].whose_turn(), Speaker::Partner);
    }

    #[test]
    fn multiline_text_is_flattened_on_write() {
        let message = Message::new("first\n\nsecond\nthird", "t", AgentRole::Testee);
        assert_eq!(format_message(&message), "Testee:first second third");
    }

    #[test]
    fn text_containing_colon_survives_round_trip() {
        let mut conv = Conversation::new("t", "p");
        conv.push(Message::new("note: colons are fine", "t", AgentRole::Testee));
        let parsed = parse_transcript(&serialize_conversation(&conv), "t", "p").unwrap();
        assert_eq!(parsed[0].messages()[0].text, "note: colons are fine");
    }

    #[test]
    fn appends_across_writer_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_1.txt");

        let mut writer = TranscriptWriter::append(&path).unwrap();
        writer
            .write_message(&Message::new("hello", "t", AgentRole::Testee))
            .unwrap();
        writer.end_conversation().unwrap();
        drop(writer);

        let mut writer = TranscriptWriter::append(&path).unwrap();
        writer
            .write_message(&Message::new("again", "t", AgentRole::Testee))
            .unwrap();
        writer.end_conversation().unwrap();
        drop(writer);

        let content = fs::read_to_string(&path).unwrap();
        let parsed = parse_transcript(&content, "t", "p").unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
