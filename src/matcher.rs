//! Template matcher — the fast path that avoids a generation call for
//! common prompts.
//!
//! Scoring is a greedy, order-independent bag-of-words heuristic: no
//! stemming, no synonym expansion, no negation handling. A floor of 10
//! (one keyword hit) is required to return a match at all; below that the
//! caller falls back to AI generation.

use serde_json::json;
use std::sync::OnceLock;
use tracing::debug;

use crate::config::{AppConfig, InputField, InputType, OutputConfig, OutputType};

/// One hand-written catalog entry.
#[derive(Debug, Clone)]
pub struct AppTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub keywords: &'static [&'static str],
    pub config: AppConfig,
}

const MATCH_FLOOR: u32 = 10;

/// Score a prompt against one template: +10 per keyword substring match,
/// +20 for the app name appearing verbatim, +2 per description word
/// (length > 3) found in the prompt.
pub fn score_template(prompt: &str, template: &AppTemplate) -> u32 {
    let prompt = prompt.to_lowercase();
    let mut score = 0;
    for keyword in template.keywords {
        if prompt.contains(keyword) {
            score += 10;
        }
    }
    if prompt.contains(&template.name.to_lowercase()) {
        score += 20;
    }
    for word in template.description.split_whitespace() {
        let word = word.to_lowercase();
        if word.len() > 3 && prompt.contains(&word) {
            score += 2;
        }
    }
    score
}

/// Return the highest-scoring catalog template for a prompt, or `None` when
/// nothing reaches the floor and the caller must generate instead.
pub fn find_matching_template(prompt: &str) -> Option<&'static AppTemplate> {
    let (best, score) = catalog()
        .iter()
        .map(|t| (t, score_template(prompt, t)))
        .max_by_key(|(_, score)| *score)?;
    debug!(template = best.id, score, "[MATCHER] best candidate");
    if score >= MATCH_FLOOR {
        Some(best)
    } else {
        None
    }
}

/// Clone a template's ready-made config.
pub fn template_to_app_config(template: &AppTemplate) -> AppConfig {
    template.config.clone()
}

/// The built-in catalog.
pub fn catalog() -> &'static [AppTemplate] {
    static CATALOG: OnceLock<Vec<AppTemplate>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        vec![
            tip_calculator(),
            text_summarizer(),
            expense_tracker(),
            word_counter(),
        ]
    })
}

fn output(id: &str, output_type: OutputType, label: &str, source: &str) -> OutputConfig {
    OutputConfig {
        id: id.to_string(),
        output_type,
        label: label.to_string(),
        source: source.to_string(),
    }
}

fn tip_calculator() -> AppTemplate {
    let code = r#"
async function run(inputs, helpers) {
    const tip = inputs.amount * (inputs.percent / 100);
    const total = inputs.amount + tip;
    const people = inputs.people > 0 ? inputs.people : 1;
    return {
        tip: helpers.utils.formatCurrency(tip),
        total: helpers.utils.formatCurrency(total),
        perPerson: helpers.utils.formatCurrency(total / people)
    };
}
"#;
    AppTemplate {
        id: "tip-calculator",
        name: "Tip Calculator",
        description: "Calculate the tip and split the bill between friends",
        keywords: &["tip", "gratuity", "bill", "split"],
        config: AppConfig {
            version: "1.0".into(),
            metadata: metadata("Tip Calculator", "Calculate the tip and split the bill", "🧮", "finance"),
            inputs: vec![
                InputField::new("amount", InputType::Number).with_label("Bill amount"),
                InputField::new("percent", InputType::Range)
                    .with_label("Tip percent")
                    .with_default(json!(18)),
                InputField::new("people", InputType::Number)
                    .with_label("People")
                    .with_default(json!(1)),
            ],
            code: Some(code.trim().to_string()),
            logic: None,
            outputs: vec![
                output("tip", OutputType::Text, "Tip", "{{tip}}"),
                output("total", OutputType::Text, "Total", "{{total}}"),
                output("perPerson", OutputType::Text, "Per person", "{{perPerson}}"),
            ],
            data_schema: None,
        },
    }
}

fn text_summarizer() -> AppTemplate {
    let code = r#"
async function run(inputs, helpers) {
    const summary = await helpers.ai(
        "Summarize the following text in three short sentences:\n\n" + inputs.text
    );
    return { summary };
}
"#;
    AppTemplate {
        id: "text-summarizer",
        name: "Text Summarizer",
        description: "Summarize long text into a few short sentences",
        keywords: &["summarize", "summary", "tldr", "shorten"],
        config: AppConfig {
            version: "1.0".into(),
            metadata: metadata("Text Summarizer", "Summarize long text", "📝", "writing"),
            inputs: vec![InputField::new("text", InputType::Textarea).with_label("Text")],
            code: Some(code.trim().to_string()),
            logic: None,
            outputs: vec![output("summary", OutputType::Markdown, "Summary", "{{summary}}")],
            data_schema: None,
        },
    }
}

fn expense_tracker() -> AppTemplate {
    let logic = json!([
        {
            "type": "data_store",
            "id": "save_expense",
            "dataType": "expenses",
            "fields": {
                "amount": "{{inputs.amount}}",
                "category": "{{inputs.category}}",
                "note": "{{inputs.note}}"
            }
        },
        {
            "type": "data_query",
            "id": "recent",
            "dataType": "expenses",
            "limit": 20,
            "outputVariable": "history"
        }
    ]);
    AppTemplate {
        id: "expense-tracker",
        name: "Expense Tracker",
        description: "Track expenses and see your recent spending history",
        keywords: &["expense", "budget", "spending", "money"],
        config: AppConfig {
            version: "1.0".into(),
            metadata: metadata("Expense Tracker", "Track your spending", "💸", "finance"),
            inputs: vec![
                InputField::new("amount", InputType::Number).with_label("Amount"),
                InputField::new("category", InputType::Select)
                    .with_label("Category")
                    .with_options(&["food", "transport", "fun", "other"]),
                InputField::new("note", InputType::Text).with_label("Note"),
            ],
            code: None,
            logic: serde_json::from_value(logic).ok(),
            outputs: vec![
                output("saved", OutputType::Text, "Saved", "{{save_expense_stored}}"),
                output("history", OutputType::Table, "Recent expenses", "{{history}}"),
            ],
            data_schema: None,
        },
    }
}

fn word_counter() -> AppTemplate {
    let code = r#"
async function run(inputs, helpers) {
    const text = inputs.text || "";
    const words = text.split(/\s+/).filter(Boolean).length;
    return { words, characters: text.length };
}
"#;
    AppTemplate {
        id: "word-counter",
        name: "Word Counter",
        description: "Count words and characters in a piece of text",
        keywords: &["count", "words", "characters", "length"],
        config: AppConfig {
            version: "1.0".into(),
            metadata: metadata("Word Counter", "Count words and characters", "🔢", "writing"),
            inputs: vec![InputField::new("text", InputType::Textarea).with_label("Text")],
            code: Some(code.trim().to_string()),
            logic: None,
            outputs: vec![
                output("words", OutputType::Text, "Words", "{{words}}"),
                output("characters", OutputType::Text, "Characters", "{{characters}}"),
            ],
            data_schema: None,
        },
    }
}

fn metadata(name: &str, description: &str, icon: &str, category: &str) -> crate::config::AppMetadata {
    crate::config::AppMetadata {
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        category: category.to_string(),
    }
}
