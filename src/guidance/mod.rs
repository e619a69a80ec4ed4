//! Profile guidance snapshots.
//!
//! Each child profile carries a cached coaching text. It is regenerated
//! eagerly after child creation and profile updates, and lazily when a
//! profile is fetched with an empty snapshot. Generator failures never
//! propagate: every path ends in the deterministic fallback text.

use crate::database::Store;
use crate::database::models::{AdviceDocRow, ChildRow, ProfileRow, Traits};
use crate::llm::{CompletionRequest, GenerationCapability, Message};

const MAX_GUIDANCE_DOCS: i64 = 4;

const DEFAULT_TIPS: [&str; 3] = [
    "Keep transitions predictable with a gentle countdown.",
    "Offer a quiet corner or weighted object when you see early signs of overload.",
    "Name emotions out loud so the child can mirror your calm tone.",
];

/// Regenerate and persist the guidance snapshot for the given child.
///
/// With `force == false` an existing snapshot is returned untouched.
/// Returns `None` when the child has no profile.
pub async fn refresh_profile_guidance(
    store: &Store,
    generator: &GenerationCapability,
    child: &ChildRow,
    force: bool,
) -> anyhow::Result<Option<String>> {
    let Some(profile) = store.profile_for_child(child.id).await? else {
        return Ok(None);
    };

    if !force {
        if let Some(existing) = profile.guidance.as_deref() {
            if !existing.trim().is_empty() {
                return Ok(Some(existing.to_string()));
            }
        }
    }

    let docs = store.advice_docs(MAX_GUIDANCE_DOCS).await?;
    let guidance = generate_snapshot(generator, child, &profile, &docs).await;
    store.set_profile_guidance(child.id, &guidance).await?;
    Ok(Some(guidance))
}

/// Refresh wrapper for request paths: failures are logged and swallowed so
/// the owning request always succeeds.
pub async fn refresh_guidance_safely(
    store: &Store,
    generator: &GenerationCapability,
    child: &ChildRow,
) {
    if let Err(err) = refresh_profile_guidance(store, generator, child, true).await {
        tracing::warn!(
            child_id = child.id,
            error = %err,
            "Could not refresh guidance snapshot"
        );
    }
}

async fn generate_snapshot(
    generator: &GenerationCapability,
    child: &ChildRow,
    profile: &ProfileRow,
    docs: &[AdviceDocRow],
) -> String {
    let prompt = compose_prompt(child, profile, docs);
    let request = CompletionRequest::new(vec![Message::user(prompt)])
        .with_temperature(0.4)
        .with_max_tokens(500);

    if let Some(text) = generator.try_complete(request).await {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    fallback_guidance(child, profile, docs)
}

fn compose_prompt(child: &ChildRow, profile: &ProfileRow, docs: &[AdviceDocRow]) -> String {
    let trait_summary = describe_traits(&profile.traits);
    let goal_text = profile
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty())
        .unwrap_or("Parent goals not provided yet.");

    let doc_tips: Vec<String> = docs
        .iter()
        .filter_map(|doc| {
            doc.advice.as_deref().map(|advice| {
                format!("- {}: {}", doc.title.as_deref().unwrap_or("Tip"), advice)
            })
        })
        .collect();
    let doc_tips = if doc_tips.is_empty() {
        "- Encourage predictable routines and sensory breaks.\n- Celebrate every small regulation win.".to_string()
    } else {
        doc_tips.join("\n")
    };

    format!(
        "You are an empathetic pediatric therapist. Create a concise, two-paragraph AI guidance \
         snapshot for the parent. Child: {name} (age {age}). Focus: {focus}. Traits: {traits}. \
         Parent goals: {goals}. Blend encouragement with concrete micro-actions. Use friendly \
         language and short sentences. Don't use greeting words like Hi! Hello! etc. Always \
         respond in English. Reference the following resource snippets when helpful:\n{tips}\n",
        name = child.name,
        age = child.age,
        focus = child.disability.as_deref().unwrap_or("emotional regulation"),
        traits = trait_summary,
        goals = goal_text,
        tips = doc_tips,
    )
}

/// Deterministic snapshot used on any generator failure or empty response.
fn fallback_guidance(child: &ChildRow, profile: &ProfileRow, docs: &[AdviceDocRow]) -> String {
    let age = if child.age > 0 {
        format!("{} years old", child.age)
    } else {
        "growing".to_string()
    };
    let focus = child.disability.as_deref().unwrap_or("emotional regulation");
    let notes = profile
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty());

    let advice: Vec<String> = docs
        .iter()
        .filter_map(|doc| doc.advice.as_deref())
        .map(|advice| advice.trim().to_string())
        .filter(|advice| !advice.is_empty())
        .take(3)
        .collect();
    let selected = if advice.is_empty() {
        DEFAULT_TIPS.iter().map(ToString::to_string).collect()
    } else {
        advice
    };

    let mut paragraphs = vec![format!(
        "{} is {} and currently focusing on {}. Keep routines steady, narrate feelings in \
         simple words, and anchor every practice in playful curiosity.",
        child.name, age, focus
    )];

    if let Some(notes) = notes {
        paragraphs.push(format!(
            "Family goals to echo this week: {notes}. Break each goal into tiny checkpoints and \
             celebrate when your child makes any attempt, not just perfect results."
        ));
    }

    paragraphs.push(format!(
        "Try these calming anchors over the next few days: {} Keep the guidance visible on the \
         fridge so every caregiver reinforces the same cues.",
        selected.join(" ")
    ));

    paragraphs.join("\n\n")
}

/// Human-readable trait rendering; absent fields are omitted.
fn describe_traits(traits: &Traits) -> String {
    let mut bits: Vec<String> = Vec::new();
    if let Some(gender) = traits.gender.as_deref() {
        if !gender.is_empty() {
            bits.push(format!("gender expression {gender}"));
        }
    }
    if let Some(hair) = traits.hair.as_deref() {
        if !hair.is_empty() {
            bits.push(format!("hair {hair}"));
        }
    }
    if let Some(skin) = traits.skin.as_deref() {
        if !skin.is_empty() {
            bits.push(format!("skin tone {skin}"));
        }
    }
    if traits.glasses {
        bits.push("wears glasses".to_string());
    }

    if bits.is_empty() {
        "mixed sensory preferences".to_string()
    } else {
        bits.join(", ")
    }
}
