//! Prompt construction for summarization and question answering.

use crate::error::{RagError, Result};

/// Separator between context chunks in the RAG prompt.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Build the question-answering prompt from retrieved chunk texts.
///
/// Blank chunks are dropped. An empty question is rejected.
pub fn build_rag_prompt<S: AsRef<str>>(question: &str, chunks: &[S]) -> Result<String> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::InvalidArgument("question must not be empty".into()));
    }
    let context = chunks
        .iter()
        .map(|c| c.as_ref().trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    Ok(format!(
        "You are a smart document analyzer. Answer the question below using ONLY the Context provided.\n\n\
         Context:\n{}\n\n\
         Question:\n{}\n\n\
         Answer:",
        context, question
    ))
}

fn summary_instruction(language: &str) -> &'static str {
    match language {
        "fr" => {
            "Tu es un assistant expert.\n\
             Résume le document ci-dessous uniquement en français.\n\
             Sois clair, concis et fidèle au contenu.\n\
             N'ajoute aucune information qui n'est pas présente dans le document."
        }
        "pt" => {
            "Você é um assistente especialista.\n\
             Resuma o documento abaixo apenas em português.\n\
             Seja claro, conciso e fiel ao conteúdo.\n\
             Não adicione informações que não estejam no documento."
        }
        _ => {
            "You are a smart document analyzer.\n\
             Summarize the document below clearly and concisely.\n\
             Do not add information that is not present in the document."
        }
    }
}

/// Build the summarization prompt in the document's language.
///
/// `content` is truncated to `max_chars` characters.
pub fn build_summary_prompt(language: &str, content: &str, max_chars: usize) -> String {
    let document: String = content.chars().take(max_chars).collect();
    format!(
        "{}\n\nDocument:\n{}\n\nSummary:",
        summary_instruction(language),
        document
    )
}

const ECHOED_MARKERS: &[&str] = &[
    "Summarize the following document:",
    "Document:",
    "Summary:",
    "Here is a summary:",
    "Here's a summary:",
];

/// Strip prompt text the model echoed back before its summary.
pub fn clean_summary_text(summary: &str) -> String {
    let mut cleaned = summary;
    for marker in ECHOED_MARKERS {
        if let Some((_, rest)) = cleaned.split_once(marker) {
            cleaned = rest.trim();
        }
    }
    cleaned.trim().to_string()
}
