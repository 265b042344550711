//! Prompt templates for the next user message
//!
//! Pure string formatting: the same question and grounding always produce the
//! same prompt.

use crate::conversation::Conversation;
use crate::extractor::ExtractedDocument;

/// What the model should ground its answer in for this turn
#[derive(Debug, Clone, Copy)]
pub enum Grounding<'a> {
    /// A document attached on this turn, embedded in full
    Attached(&'a ExtractedDocument),
    /// A document was embedded on an earlier turn and lives in the history
    Earlier,
    /// No document in this session
    None,
}

pub fn compose(question: &str, grounding: Grounding<'_>) -> String {
    match grounding {
        Grounding::Attached(doc) => format!(
            "here is the contents of the file named {},\n\n\
             And here is the text data that you have to analyse:\n\
             {}\n\
             now use the file contents and answer the below question:\n\
             {}?",
            doc.filename, doc.text, question
        ),
        Grounding::Earlier => format!(
            "answer the below question:\n\
             {}\n\
             only from the uploaded file from above.",
            question
        ),
        Grounding::None => format!(
            "{} , answer this question, in a brief and concise manner.",
            question
        ),
    }
}

/// Pick the template for this turn. An attachment is embedded once; after
/// that the conversation is grounded and follow-ups rely on the history.
pub fn compose_turn(
    conversation: &mut Conversation,
    question: &str,
    attachment: Option<&ExtractedDocument>,
) -> String {
    let grounding = match attachment {
        Some(doc) => Grounding::Attached(doc),
        None if conversation.has_grounding() => Grounding::Earlier,
        None => Grounding::None,
    };
    let prompt = compose(question, grounding);
    if attachment.is_some() {
        conversation.mark_grounded();
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes() -> ExtractedDocument {
        ExtractedDocument {
            filename: "notes.txt".to_string(),
            text: "Line one Line two".to_string(),
        }
    }

    #[test]
    fn test_attached_template_embeds_file_and_question() {
        let doc = notes();
        let prompt = compose("What is this about?", Grounding::Attached(&doc));
        assert!(prompt.contains("notes.txt"));
        assert!(prompt.contains("Line one Line two"));
        assert!(prompt.ends_with("What is this about??"));

        let filename_at = prompt.find("notes.txt").unwrap();
        let content_at = prompt.find("Line one Line two").unwrap();
        let question_at = prompt.find("What is this about?").unwrap();
        assert!(filename_at < content_at && content_at < question_at);
    }

    #[test]
    fn test_concise_template() {
        let prompt = compose("2+2?", Grounding::None);
        assert_eq!(
            prompt,
            "2+2? , answer this question, in a brief and concise manner."
        );
    }

    #[test]
    fn test_earlier_template_defers_to_history() {
        let prompt = compose("Who wrote it", Grounding::Earlier);
        assert!(prompt.contains("Who wrote it"));
        assert!(prompt.ends_with("only from the uploaded file from above."));
    }

    #[test]
    fn test_turns_move_from_attached_to_earlier() {
        let doc = notes();
        let mut conversation = Conversation::new();

        let first = compose_turn(&mut conversation, "q1", None);
        assert_eq!(first, compose("q1", Grounding::None));

        let second = compose_turn(&mut conversation, "q2", Some(&doc));
        assert_eq!(second, compose("q2", Grounding::Attached(&doc)));
        assert!(conversation.has_grounding());

        let third = compose_turn(&mut conversation, "q3", None);
        assert_eq!(third, compose("q3", Grounding::Earlier));
    }

    #[test]
    fn test_composition_is_deterministic() {
        let doc = notes();
        for grounding in [Grounding::Attached(&doc), Grounding::Earlier, Grounding::None] {
            assert_eq!(compose("q", grounding), compose("q", grounding));
        }
    }

    #[test]
    fn test_question_only_changes_question_segment() {
        let doc = notes();
        let a = compose("first", Grounding::Attached(&doc));
        let b = compose("second", Grounding::Attached(&doc));
        assert_eq!(a.strip_suffix("first?"), b.strip_suffix("second?"));
    }
}
