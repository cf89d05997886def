//! Prompts sent to the language model and the fallbacks applied to its answers.

use tracing::warn;

use crate::llm::{LanguageModel, LlmError};
use crate::product::ProductListing;

const ANALYSIS_TEMPERATURE: f32 = 0.7;
const TRANSLATION_TEMPERATURE: f32 = 0.3;
const TREND_TEMPERATURE: f32 = 0.7;

/// Products listed in the trend prompt.
const TREND_SAMPLE: usize = 30;

pub const TREND_FAILURE_NOTICE: &str = "Trend analysis could not be generated for this report.";

pub fn analysis_prompt(product: &ProductListing, website: Option<&str>, language: &str) -> String {
    let mut context = String::new();
    if !product.first_feed_post.is_empty() {
        context.push_str(&format!("\n\n[First feed post]\n{}", product.first_feed_post));
    }
    if let Some(site) = website.filter(|s| !s.is_empty()) {
        context.push_str(&format!("\n\n[Product website]\n{site}"));
    }

    format!(
        r#"You are a senior frontend engineer and a product-minded CPO.
Here is a product listed on Indie Hackers:

Name: {name}
Description: {description}
Monthly revenue: ${revenue}/month
Stripe-verified revenue: {verified}{context}

Using all of the above, analyse the following in detail:

1. Core value proposition
   - What core problem does this product solve?
   - Who is the target customer?
   - What makes its positioning distinctive?

2. Benchmarking value for a frontend developer with two years of experience
   - Worth benchmarking: ✅/❌
   - If ✅, the concrete reasons (learning points, technical challenges, business model lessons)
   - If ❌, why it is not worth studying

3. Predicted tech stack and architecture
   - Likely frontend stack (Next.js, React, Vue, ...)
   - Likely backend and infrastructure (Supabase, AWS, Vercel, ...)
   - Likely database and storage
   - Likely payment provider (Stripe, Paddle, ...)
   - Likely key libraries and tools

4. Build time and difficulty estimate
   - Expected time for that developer to build something similar (in weeks)
   - Technical difficulty (beginner/intermediate/advanced)
   - Time split across prototype, MVP and finished version
   - Expected obstacles and how to get past them

5. Business model
   - Revenue model (subscription, one-off, freemium, ...)
   - Likely pricing
   - Marketing strategy hints

Keep each section clearly separated and give concrete, practical information.
Write in {language}, with enough detail that a developer can act on it."#,
        name = product.name,
        description = product.description,
        revenue = product.revenue,
        verified = if product.is_verified { "yes" } else { "no" },
    )
}

pub fn translation_prompt(description: &str, language: &str) -> String {
    format!(
        r#"Translate the following English product description into natural {language}:

{description}

Guidelines:
- Translate technical terms where sensible; widely known English terms may stay as they are
- Keep it natural and easy to read
- Preserve the product's meaning exactly"#
    )
}

pub fn trend_prompt(products: &[ProductListing], language: &str) -> String {
    let list = products
        .iter()
        .take(TREND_SAMPLE)
        .enumerate()
        .map(|(i, p)| {
            format!(
                "{}. {} - {} (MRR: ${}, Stripe verified: {})",
                i + 1,
                p.name,
                p.description,
                p.revenue,
                if p.is_verified { "✅" } else { "❌" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Here are the latest SaaS products collected from Indie Hackers:

{list}

Analyse them and write a trend summary in this format:

## 💡 SaaS trends on today's page

### Observations by category

Cover each of these categories:
- AI productivity tools
- Single-purpose utility SaaS
- Unverified revenue
- Community-driven marketing
- AI editing and automation

For each category give:
- **Observation**: a concrete pattern or trait
- **Idea**: what a frontend developer with two years of experience could borrow

Use this layout:

Category | Observation | Idea
--- | --- | ---
AI productivity tools | [observation] | ✨ [idea]
Single-purpose utility SaaS | [observation] | 🔧 [idea]
Unverified revenue | [observation] | 💰 [idea]
Community-driven marketing | [observation] | 📢 [idea]
AI editing and automation | [observation] | 🪄 [idea]

Write in {language} and keep the insights concrete and practical."#
    )
}

pub async fn analyze(
    model: &dyn LanguageModel,
    product: &ProductListing,
    website: Option<&str>,
    language: &str,
) -> Result<String, LlmError> {
    let prompt = analysis_prompt(product, website, language);
    let answer = model.complete(&prompt, ANALYSIS_TEMPERATURE).await?;
    Ok(answer.trim().to_string())
}

/// An empty answer falls back to the untranslated description.
pub async fn translate(
    model: &dyn LanguageModel,
    product: &ProductListing,
    language: &str,
) -> Result<String, LlmError> {
    let prompt = translation_prompt(&product.description, language);
    let answer = model.complete(&prompt, TRANSLATION_TEMPERATURE).await?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(product.description.clone());
    }
    Ok(answer.to_string())
}

/// Never fails; a model error is replaced by [`TREND_FAILURE_NOTICE`].
pub async fn summarize_trends(
    model: &dyn LanguageModel,
    products: &[ProductListing],
    language: &str,
) -> String {
    let prompt = trend_prompt(products, language);
    match model.complete(&prompt, TREND_TEMPERATURE).await {
        Ok(answer) => answer.trim().to_string(),
        Err(e) => {
            warn!("trend analysis failed: {e}");
            TREND_FAILURE_NOTICE.to_string()
        }
    }
}
