// src/prompt.rs
//! Prompt construction and the fixed replies that bypass generation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::Prompt;
use crate::types::Language;

pub const CONTACT_311: &str = "613-546-0000";

const SYSTEM: &str = "You are a helpful assistant for the City of Kingston 311 service.";

static FORMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(forms?|applications?|apply|submit)\b").expect("forms regex"));

/// Grounded-answer prompt over numbered citation blocks.
pub fn answer_prompt(
    question: &str,
    topic: &str,
    context: &str,
    language: Language,
    calendar_url: &str,
) -> Prompt {
    let topic_label = topic.replace('_', " ");
    let schedule = if topic == "waste_collection" {
        format!(
            "\nFor schedule or collection-day questions, say that collection follows the waste \
collection calendar, add the relevant schedule facts from the context, and end with: \
\"To find your specific collection day, enter your address at {calendar_url}\"\n"
        )
    } else {
        String::new()
    };

    let user = format!(
        "Answer the user's question using ONLY the numbered sources below.\n\
\n\
Rules:\n\
1. Use only facts from the sources. Cite them inline as [1], [2], ... matching their numbers.\n\
2. Give complete answers in simple language: steps, requirements, deadlines, fees.\n\
3. If forms or applications are mentioned, explain the process.\n\
4. Answer only about {topic_label}; do not bring in unrelated services.\n\
5. If the sources do not contain the answer, say: \"I don't have that specific information. Please contact 311 at {CONTACT_311}.\"\n\
6. Write the answer in {lang}.\n\
{schedule}\n\
Sources from the City of Kingston ({topic}):\n\
{context}\n\
\n\
Question: {question}\n\
\n\
Answer:",
        lang = language.display_name(),
    );
    Prompt {
        system: SYSTEM.to_string(),
        user,
    }
}

pub fn greeting_reply(language: Language) -> &'static str {
    match language {
        Language::En => "Hello! I'm the City of Kingston 311 assistant. I can help with city services such as parking, garbage and recycling, road closures, transit and property tax. What can I help you with today?",
        Language::Fr => "Bonjour! Je suis l'assistant 311 de la Ville de Kingston. Je peux vous aider avec les services municipaux comme le stationnement, les ordures et le recyclage, les fermetures de routes, le transport en commun et l'impôt foncier. Comment puis-je vous aider?",
    }
}

/// Answer when retrieval is unavailable.
pub fn fallback_reply(language: Language) -> String {
    match language {
        Language::En => format!(
            "I couldn't find specific information about that. Please try rephrasing your question or contact 311 at {CONTACT_311}."
        ),
        Language::Fr => format!(
            "Je n'ai pas trouvé d'information précise à ce sujet. Veuillez reformuler votre question ou communiquer avec le 311 au {CONTACT_311}."
        ),
    }
}

pub fn collection_reply(address: Option<&str>, calendar_url: &str, language: Language) -> String {
    match (language, address) {
        (Language::En, Some(a)) => format!(
            "I've noted your address: {a}. To find your specific collection day, enter it in the City's waste collection calendar at {calendar_url}. The calendar shows your exact schedule."
        ),
        (Language::En, None) => format!(
            "Garbage and recycling collection days depend on your address. Enter your address (for example, 576 Division Street) in the City's waste collection calendar at {calendar_url} to see your schedule."
        ),
        (Language::Fr, Some(a)) => format!(
            "J'ai noté votre adresse : {a}. Pour connaître votre jour de collecte, entrez-la dans le calendrier de collecte de la Ville : {calendar_url}."
        ),
        (Language::Fr, None) => format!(
            "Les jours de collecte dépendent de votre adresse. Entrez votre adresse (par exemple, 576 Division Street) dans le calendrier de collecte de la Ville : {calendar_url}."
        ),
    }
}

/// Trailing "To apply" line when the answer talks about forms but links nowhere.
pub fn forms_link_suffix(answer: &str, first_url: Option<&str>) -> Option<String> {
    let url = first_url.filter(|u| !u.is_empty())?;
    if !FORMS.is_match(answer) || answer.contains("http://") || answer.contains("https://") {
        return None;
    }
    Some(format!("\n\nTo apply, visit: {url}"))
}

/// Why a collected answer is regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerIssue {
    /// The model claims it was given no context.
    ClaimsNoContext,
    /// The model wandered into another service; carries the offending term.
    OffTopic(&'static str),
}

impl AnswerIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerIssue::ClaimsNoContext => "claims_no_context",
            AnswerIssue::OffTopic(_) => "off_topic",
        }
    }
}

/// Terms that must not show up in an answer about the given category.
fn unrelated_terms(category: &str) -> &'static [&'static str] {
    match category {
        "parking" => &["garbage", "waste", "collection calendar", "recycling"],
        "property_tax" => &["garbage", "waste", "parking", "collection"],
        "hazardous_waste" => &["parking", "tax", "collection calendar"],
        "fire_permits" => &["garbage", "parking", "tax"],
        "noise" => &["garbage", "parking", "tax", "collection"],
        _ => &[],
    }
}

pub fn check_answer(answer: &str, category: &str) -> Option<AnswerIssue> {
    let lower = answer.to_lowercase();
    if lower.contains("context")
        && ["missing", "not provided", "seems that the context"]
            .iter()
            .any(|t| lower.contains(t))
    {
        return Some(AnswerIssue::ClaimsNoContext);
    }
    unrelated_terms(category)
        .iter()
        .find(|t| lower.contains(*t))
        .map(|t| AnswerIssue::OffTopic(*t))
}

/// Second-attempt prompt for an answer that failed [`check_answer`].
pub fn strict_prompt(
    issue: AnswerIssue,
    question: &str,
    category: &str,
    context: &str,
    language: Language,
) -> Prompt {
    let topic = category.replace('_', " ");
    let instruction = match issue {
        AnswerIssue::ClaimsNoContext => "You MUST answer using the sources provided below. \
The sources contain the answer. Do not say the context is missing; it is provided below."
            .to_string(),
        AnswerIssue::OffTopic(_) => format!(
            "Answer ONLY about {topic}. Do NOT mention garbage, waste collection, parking permits, \
property tax, or any other service."
        ),
    };
    let user = format!(
        "{instruction}\n\
\n\
Sources from the City of Kingston ({category}):\n\
{context}\n\
\n\
Question: {question}\n\
\n\
Write the answer in {lang}. Answer (only {topic}):",
        lang = language.display_name(),
    );
    Prompt {
        system: SYSTEM.to_string(),
        user,
    }
}
