//! Prompt and response-schema assembly for Gemini analysis calls.
//!
//! One system instruction covers every perspective in the batch: shared
//! guidance first, then a section per perspective carrying its catalog
//! instructions. The response schema pins `perspective_name` to exactly
//! the requested ids.

use libro_core::{AnalysisKind, PassageContext, PerspectiveProfile};
use serde_json::{json, Value};

/// Book names cross references must use.
pub const CANONICAL_BOOKS: &[&str] = &[
    "Genesis", "Exodus", "Leviticus", "Numbers", "Deuteronomy", "Joshua", "Judges", "Ruth",
    "1 Samuel", "2 Samuel", "1 Kings", "2 Kings", "1 Chronicles", "2 Chronicles", "Ezra",
    "Nehemiah", "Esther", "Job", "Psalms", "Proverbs", "Ecclesiastes", "Song of Solomon",
    "Isaiah", "Jeremiah", "Lamentations", "Ezekiel", "Daniel", "Hosea", "Joel", "Amos",
    "Obadiah", "Jonah", "Micah", "Nahum", "Habakkuk", "Zephaniah", "Haggai", "Zechariah",
    "Malachi", "Matthew", "Mark", "Luke", "John", "Acts", "Romans", "1 Corinthians",
    "2 Corinthians", "Galatians", "Ephesians", "Philippians", "Colossians", "1 Thessalonians",
    "2 Thessalonians", "1 Timothy", "2 Timothy", "Titus", "Philemon", "Hebrews", "James",
    "1 Peter", "2 Peter", "1 John", "2 John", "3 John", "Jude", "Revelation",
];

const SCHOLAR_PREAMBLE: &str = "You are a biblical scholar writing short theological \
analyses of a passage, once for each Christian tradition listed below. Write every \
analysis from inside its tradition, rooted in that tradition's theology and history, \
while remaining respectful of the others.";

const SHARED_GUIDELINES: &str = "Guidelines for every analysis:
- Use scholarly but accessible language and give historical or doctrinal context where it helps.
- Keep each analysis between 50 and 70 words.
- The only markdown allowed is bold, used two or three times to emphasise key terms.
- Cite related passages as Book Chapter:Verse or Book Chapter:Verse-Verse.
- When Strong's numbers are supplied, draw on the original-language meanings but never mention the numbers themselves.";

const CROSS_REFERENCE_GUIDELINES: &str = "For every tradition, list between two and five \
passages of Scripture that bear directly on the given passage as that tradition reads it. \
Each entry needs the book, chapter, first verse, optional last verse, a display form such \
as \"Romans 5:8\" and a one-sentence note on why it is relevant. Do not write any other \
analysis text.";

/// System instruction for a batch of perspectives.
pub fn system_instruction(kind: AnalysisKind, perspectives: &[PerspectiveProfile]) -> String {
    let mut out = String::new();
    out.push_str(SCHOLAR_PREAMBLE);
    out.push_str("\n\n");

    match kind {
        AnalysisKind::CrossReference => out.push_str(CROSS_REFERENCE_GUIDELINES),
        AnalysisKind::Summary | AnalysisKind::Question => {
            out.push_str(SHARED_GUIDELINES);
            out.push_str(
                "\n- Support each analysis with two to five cross references taken from the Bible.",
            );
        }
    }
    out.push_str("\n\n");

    for profile in perspectives {
        out.push_str(&format!(
            "## {} (perspective_name: \"{}\")\n{}\n\n",
            profile.display_name, profile.id, profile.instructions
        ));
    }

    out.push_str(
        "Return one entry in \"analyses\" per tradition above, with perspective_name set to \
         the quoted id.\n\nFor cross references use exactly these book names: ",
    );
    out.push_str(&CANONICAL_BOOKS.join(", "));
    out
}

/// User turn: the passage, its Strong's data and, for questions, the
/// question.
pub fn user_prompt(passage: &PassageContext, kind: AnalysisKind, question: Option<&str>) -> String {
    let opening = match kind {
        AnalysisKind::Summary => "Analyse this biblical passage from each tradition:",
        AnalysisKind::Question => {
            "Answer the question below about this biblical passage from each tradition:"
        }
        AnalysisKind::CrossReference => "List cross references for this biblical passage from each tradition:",
    };

    let mut out = format!(
        "{}\n\nReference: {}\nText: \"{}\"\n",
        opening, passage.reference, passage.text
    );

    if let Some(strongs) = &passage.strongs {
        out.push_str(&format!(
            "\nText with Strong's numbers: \"{}\"\nKey Strong's numbers in this passage: {}\n",
            strongs.text_with_strongs,
            strongs.numbers.join(", ")
        ));
    }

    if let (AnalysisKind::Question, Some(question)) = (kind, question) {
        out.push_str(&format!("\nQuestion: {}\n", question));
    }
    out
}

/// OpenAPI-style schema for Gemini's `responseSchema`.
pub fn response_schema(kind: AnalysisKind, perspectives: &[PerspectiveProfile]) -> Value {
    let ids: Vec<&str> = perspectives.iter().map(|p| p.id.as_str()).collect();

    let cross_reference = json!({
        "type": "OBJECT",
        "properties": {
            "book": { "type": "STRING" },
            "chapter": { "type": "INTEGER" },
            "verse_start": { "type": "INTEGER" },
            "verse_end": { "type": "INTEGER", "nullable": true },
            "reference_display": { "type": "STRING" },
            "relevance_note": { "type": "STRING" }
        },
        "required": ["book", "chapter", "verse_start", "reference_display", "relevance_note"]
    });

    let analysis = match kind {
        AnalysisKind::CrossReference => json!({
            "type": "OBJECT",
            "properties": {
                "perspective_name": { "type": "STRING", "format": "enum", "enum": ids },
                "cross_references": { "type": "ARRAY", "items": cross_reference }
            },
            "required": ["perspective_name", "cross_references"]
        }),
        AnalysisKind::Summary | AnalysisKind::Question => json!({
            "type": "OBJECT",
            "properties": {
                "perspective_name": { "type": "STRING", "format": "enum", "enum": ids },
                "response_text": { "type": "STRING" },
                "cross_references": { "type": "ARRAY", "items": cross_reference }
            },
            "required": ["perspective_name", "response_text", "cross_references"]
        }),
    };

    json!({
        "type": "OBJECT",
        "properties": {
            "analyses": { "type": "ARRAY", "items": analysis }
        },
        "required": ["analyses"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use libro_core::{PerspectiveCatalog, StrongsAnnotation, VerseRange};

    fn profiles(ids: &[&str]) -> Vec<PerspectiveProfile> {
        let catalog = PerspectiveCatalog::builtin();
        ids.iter()
            .map(|id| catalog.get(&id.parse().unwrap()).unwrap().clone())
            .collect()
    }

    fn passage(strongs: bool) -> PassageContext {
        PassageContext {
            range: VerseRange::single(26137),
            reference: "John 3:16".to_string(),
            text: "For God so loved the world".to_string(),
            strongs: strongs.then(|| StrongsAnnotation {
                text_with_strongs: "For God G2316 so loved G25".to_string(),
                numbers: vec!["G2316".to_string(), "G25".to_string()],
            }),
            digest: "digest".to_string(),
        }
    }

    #[test]
    fn test_system_instruction_has_section_per_perspective() {
        let text = system_instruction(AnalysisKind::Summary, &profiles(&["catholic", "moravian"]));
        assert!(text.contains("perspective_name: \"catholic\""));
        assert!(text.contains("perspective_name: \"moravian\""));
        assert!(text.contains("Song of Solomon"));
        assert!(text.contains("50 and 70 words"));
    }

    #[test]
    fn test_cross_reference_instruction_skips_text_guidance() {
        let text = system_instruction(AnalysisKind::CrossReference, &profiles(&["baptist"]));
        assert!(!text.contains("50 and 70 words"));
        assert!(text.contains("relevant"));
    }

    #[test]
    fn test_user_prompt_includes_question_only_for_question_kind() {
        let asked = user_prompt(&passage(false), AnalysisKind::Question, Some("Who is the Son?"));
        assert!(asked.contains("Question: Who is the Son?"));

        let summary = user_prompt(&passage(false), AnalysisKind::Summary, Some("ignored"));
        assert!(!summary.contains("Question:"));
        assert!(summary.contains("Reference: John 3:16"));
    }

    #[test]
    fn test_user_prompt_includes_strongs() {
        let text = user_prompt(&passage(true), AnalysisKind::Summary, None);
        assert!(text.contains("G2316, G25"));
        assert!(!user_prompt(&passage(false), AnalysisKind::Summary, None).contains("Strong's"));
    }

    #[test]
    fn test_schema_pins_perspective_names() {
        let schema = response_schema(AnalysisKind::Summary, &profiles(&["catholic", "lutheran"]));
        let names = &schema["properties"]["analyses"]["items"]["properties"]["perspective_name"]["enum"];
        assert_eq!(names, &json!(["catholic", "lutheran"]));
    }

    #[test]
    fn test_cross_reference_schema_has_no_text() {
        let schema = response_schema(AnalysisKind::CrossReference, &profiles(&["catholic"]));
        let item = &schema["properties"]["analyses"]["items"]["properties"];
        assert!(item.get("response_text").is_none());
        assert!(item.get("cross_references").is_some());
    }
}
