use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ModelId;

/// System prompt used when no persona is selected.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Blue, an advanced AI assistant with a friendly, engaging, and knowledgeable personality. Your responses should be:

- Helpful and informative, providing accurate and well-structured information
- Conversational and natural, making users feel comfortable
- Clear and concise, while being thorough when needed
- Professional yet approachable, using a friendly tone
- Proactive in suggesting relevant follow-up questions or related topics
- Honest about limitations, admitting when you're not sure about something
- Respectful of user privacy and ethical boundaries

You have access to multiple AI models and can analyze images. You aim to make every interaction meaningful and helpful while maintaining a warm, engaging presence.";

const AVATAR_COLORS: [&str; 5] = ["b91c1c", "047857", "7c3aed", "2563eb", "c026d3"];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub avatar_url: String,
    pub system_prompt: String,
    pub model: String,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Starting point offered when creating a persona.
#[derive(Clone, Copy, Debug)]
pub struct PersonaTemplate {
    pub name: &'static str,
    pub avatar_seed: &'static str,
    pub avatar_color: &'static str,
    pub system_prompt: &'static str,
    pub model: ModelId,
}

const TEMPLATES: [PersonaTemplate; 3] = [
    PersonaTemplate {
        name: "Professor Quantum",
        avatar_seed: "quantum",
        avatar_color: "b91c1c",
        system_prompt: "I am Professor Quantum, a brilliant but approachable quantum physicist. I specialize in explaining complex scientific concepts in simple terms, using analogies and real-world examples. I'm passionate about making science accessible to everyone.",
        model: ModelId::Mixtral8x7b,
    },
    PersonaTemplate {
        name: "Chef Isabella",
        avatar_seed: "chef",
        avatar_color: "047857",
        system_prompt: "I am Chef Isabella, a world-renowned culinary expert with a warm personality. I love sharing recipes, cooking techniques, and food history. I can help with meal planning, ingredient substitutions, and cooking tips for all skill levels.",
        model: ModelId::Llama31_70b,
    },
    PersonaTemplate {
        name: "Luna the Life Coach",
        avatar_seed: "luna",
        avatar_color: "7c3aed",
        system_prompt: "I am Luna, a compassionate life coach focused on personal growth and well-being. I help people set meaningful goals, develop healthy habits, and overcome obstacles. I use positive psychology and practical strategies to support your journey.",
        model: ModelId::Gemma2_9b,
    },
];

pub fn avatar_url(seed: &str, color: &str) -> String {
    format!(
        "https://api.dicebear.com/7.x/bottts/svg?seed={}&backgroundColor={}",
        seed, color
    )
}

/// Avatar with a fresh seed; the color is derived from the seed.
pub fn random_avatar_url() -> String {
    let seed = Uuid::new_v4().simple().to_string();
    let seed = &seed[..7];
    let idx = seed.bytes().map(usize::from).sum::<usize>() % AVATAR_COLORS.len();
    avatar_url(seed, AVATAR_COLORS[idx])
}

impl Persona {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, model: ModelId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            avatar_url: random_avatar_url(),
            system_prompt: system_prompt.into(),
            model: model.as_str().to_string(),
            is_public: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_template(t: &PersonaTemplate) -> Self {
        let mut p = Self::new(t.name, t.system_prompt, t.model);
        p.avatar_url = avatar_url(t.avatar_seed, t.avatar_color);
        p
    }

    pub fn templates() -> &'static [PersonaTemplate] {
        &TEMPLATES
    }

    /// Model the persona asks for, falling back to the default for unknown ids.
    pub fn model_id(&self) -> ModelId {
        ModelId::resolve(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_carry_their_models_and_avatars() {
        let luna = Persona::from_template(&Persona::templates()[2]);
        assert_eq!(luna.name, "Luna the Life Coach");
        assert_eq!(luna.model_id(), ModelId::Gemma2_9b);
        assert!(luna.avatar_url.contains("seed=luna"));
        assert!(luna.avatar_url.ends_with("backgroundColor=7c3aed"));
    }

    #[test]
    fn stale_model_resolves_to_default() {
        let mut p = Persona::new("Old", "prompt", ModelId::Gemma2_9b);
        p.model = "retired-model".into();
        assert_eq!(p.model_id(), ModelId::DEFAULT);
    }

    #[test]
    fn random_avatar_uses_known_palette() {
        let url = random_avatar_url();
        assert!(AVATAR_COLORS.iter().any(|c| url.ends_with(c)));
    }
}
