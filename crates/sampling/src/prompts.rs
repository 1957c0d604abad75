use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long a loaded user context file is reused before it is read again.
pub const CONTEXT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

const DESCRIPTION_GUIDANCE: &str = "A description is one short paragraph that says what the category holds and when it should (or should not) be consulted or written to. It is shown in the summary listing next to the category name, so it must only describe content that is actually in the category. It may point at related categories by name.";

pub struct SingleCategoryAnswerPrompt<'a> {
    pub query: &'a str,
    pub category_name: &'a str,
    pub reason: &'a str,
    pub content: &'a str,
}

pub struct SingleCategoryUpdatePrompt<'a> {
    pub category_name: &'a str,
    /// Current summary listing, so facts held by sibling categories are not duplicated.
    pub summary: &'a str,
    pub previous_content: Option<&'a str>,
    pub information: &'a str,
    pub reason: &'a str,
}

#[derive(Default)]
struct ContextCache {
    loaded_at: Option<Instant>,
    text: String,
}

/// Builds every prompt the engine sends, prefixed with the shared archivist preamble.
pub struct PromptBuilder {
    context_file: Option<PathBuf>,
    user_category: String,
    context: Mutex<ContextCache>,
}

impl PromptBuilder {
    pub fn new(context_file: Option<PathBuf>, user_category: impl Into<String>) -> Self {
        Self {
            context_file,
            user_category: user_category.into(),
            context: Mutex::new(ContextCache::default()),
        }
    }

    async fn user_context(&self) -> Option<String> {
        let path = self.context_file.as_ref()?;
        let mut cache = self.context.lock().await;
        let stale = cache
            .loaded_at
            .map_or(true, |at| at.elapsed() >= CONTEXT_REFRESH_INTERVAL);
        if stale {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => cache.text = text,
                Err(err) => log::warn!("Failed to read context file {}: {err}", path.display()),
            }
            cache.loaded_at = Some(Instant::now());
        }
        (!cache.text.trim().is_empty()).then(|| cache.text.clone())
    }

    async fn preamble(&self) -> String {
        let mut out = format!(
            "You are an archivist responsible for storing and retrieving knowledge about a codebase and its user.\n\
             Knowledge is split into categories, each stored as a markdown document. Categories are named by slash-separated paths such as `lang/rust`, `feature/networking` or `feature/networking/http`.\n\
             A summary lists every category with a short description. The special `{}` category holds the user's own details and preferences.\n",
            self.user_category
        );
        if let Some(context) = self.user_context().await {
            let _ = write!(
                out,
                "\nThe user supplied this shared context to help with storage and retrieval:\n<CONTEXT>\n{}\n</CONTEXT>\n",
                context.trim()
            );
        }
        out
    }

    pub async fn category_description(&self, category_name: &str, content: &str) -> String {
        format!(
            "{preamble}\nTask: write the summary description for one category.\n{DESCRIPTION_GUIDANCE}\n\n\
             Reply with the description inside a <DESCRIPTION> tag, e.g. <DESCRIPTION>...</DESCRIPTION>.\n\n\
             <CONTENT categoryName=\"{category_name}\">\n{content}\n</CONTENT>",
            preamble = self.preamble().await,
        )
    }

    pub async fn classify(&self, summary: &str, information: &str, is_ingestion: bool) -> String {
        let summary = if summary.trim().is_empty() {
            "No categories exist yet."
        } else {
            summary
        };
        let mut out = format!(
            "{preamble}\nTask: decide which categories the information below belongs to.\n\n\
             <INFORMATION>\n{information}\n</INFORMATION>\n\n\
             The existing categories and their descriptions:\n<SUMMARY>\n{summary}\n</SUMMARY>\n\n",
            preamble = self.preamble().await,
        );

        if is_ingestion {
            out.push_str("Return one or more <CATEGORY> tags.");
        } else {
            out.push_str("It is fine if no category is relevant. Otherwise return the relevant ones as <CATEGORY> tags.");
        }
        out.push_str(
            " Each <CATEGORY> holds a <CATEGORY_NAME> tag and a <WHAT_TO_INCLUDE> tag. \
             <WHAT_TO_INCLUDE> explains which parts of <INFORMATION> matter for that category; do not copy the information itself, it is sent along separately. \
             Be specific: name the functions, classes, features or languages involved.\n",
        );

        if is_ingestion {
            out.push_str(
                "When related categories exist, also say what NOT to put in each one so the same fact is not stored twice. \
                 You may mention related categories worth cross-referencing.\n\
                 Prefer existing categories, but create new ones when nothing fits. Category names are file paths: \
                 slash-separated segments made only of letters, digits, `_` and `-`.\n",
            );
        } else {
            out.push_str("Only name categories that already exist in the summary.\n");
        }
        out
    }

    pub async fn single_category_answer(&self, prompt: SingleCategoryAnswerPrompt<'_>) -> String {
        format!(
            "{preamble}\nTask: answer a query using only one archive category.\n\n\
             <QUERY>\n{query}\n</QUERY>\n\n\
             <ARCHIVE_CATEGORY_NAME>\n{name}\n</ARCHIVE_CATEGORY_NAME>\n\n\
             <ARCHIVE_CONTENT>\n{content}\n</ARCHIVE_CONTENT>\n\n\
             <WHAT_TO_INCLUDE>\n{reason}\n</WHAT_TO_INCLUDE>\n\n\
             Use <WHAT_TO_INCLUDE> to pick the relevant parts of <ARCHIVE_CONTENT>. Do not infer anything that is not written there.\n\
             Reply with an <ANSWER> tag holding the (possibly partial) answer. If this category has nothing relevant, reply with a <SKIP> tag instead.\n\
             If the content explicitly mentions other categories that would help, add one <CATEGORY_REFERENCE> tag per category, outside the <ANSWER>, \
             each holding a <CATEGORY_NAME> and a <WHAT_TO_INCLUDE>. References are allowed alongside <SKIP>.",
            preamble = self.preamble().await,
            query = prompt.query,
            name = prompt.category_name,
            content = prompt.content,
            reason = prompt.reason,
        )
    }

    pub async fn summarize(&self, query: &str, answers: &BTreeMap<String, String>) -> String {
        let mut entries = String::new();
        for (category_name, answer) in answers {
            let _ = write!(
                entries,
                "<ARCHIVE_ENTRY categoryName=\"{category_name}\">\n{answer}\n</ARCHIVE_ENTRY>\n"
            );
        }
        format!(
            "{preamble}\nTask: merge partial answers gathered from several categories into one answer.\n\n\
             <QUERY>\n{query}\n</QUERY>\n\n\
             <ARCHIVE_ENTRIES>\n{entries}</ARCHIVE_ENTRIES>\n\n\
             Reply with the final answer inside an <ANSWER> tag. A partial answer is fine; never invent information.",
            preamble = self.preamble().await,
        )
    }

    pub async fn single_category_update(&self, prompt: SingleCategoryUpdatePrompt<'_>) -> String {
        let previous = match prompt.previous_content.filter(|c| !c.trim().is_empty()) {
            Some(content) => format!(
                "The category currently contains:\n<PREVIOUS_CATEGORY_CONTENT>\n{content}\n</PREVIOUS_CATEGORY_CONTENT>"
            ),
            None => "This category is new; write its content from scratch.".to_string(),
        };
        let summary = match prompt.summary.trim() {
            "" => String::new(),
            summary => format!(
                "Every category in memory, with its description:\n<SUMMARY>\n{summary}\n</SUMMARY>\n\
                 Use it to keep this category focused; information that belongs to another category \
                 should not be duplicated here.\n\n"
            ),
        };
        format!(
            "{preamble}\nTask: update the category \"{name}\" with new information.\n\n\
             {summary}\
             <INFORMATION>\n{information}\n</INFORMATION>\n\n\
             The category was picked for this reason; only keep the parts of <INFORMATION> it covers:\n\
             <WHAT_TO_INCLUDE>\n{reason}\n</WHAT_TO_INCLUDE>\n\n\
             {previous}\n\n\
             If nothing applies, reply with a <SKIP> tag. Otherwise reply with the complete new markdown in a <CATEGORY_CONTENT> tag \
             and a short <DIFF_SUMMARY> of what changed.\n\
             Keep existing content unless <WHAT_TO_INCLUDE> says to remove it, and do not change what the category is about. \
             A short description of the category at the top is helpful, and other categories may be referenced by name.",
            preamble = self.preamble().await,
            name = prompt.category_name,
            information = prompt.information,
            reason = prompt.reason,
        )
    }
}
