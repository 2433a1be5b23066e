use std::sync::Arc;

use super::{blocking, Commands};
use crate::error::CommandError;
use crate::languages::{self, LanguageInfo};
use crate::translation;

// ===== TRANSLATION COMMANDS =====

impl Commands {
    /// All translation languages, sorted by name.
    pub async fn list_languages(&self) -> Vec<LanguageInfo> {
        languages::list()
    }

    /// Translate with the loaded translation model.
    pub async fn translate(
        &self,
        text: String,
        source_lang: String,
        target_lang: String,
    ) -> Result<String, CommandError> {
        let manager = Arc::clone(&self.translation);
        blocking(move || translation::translate(&manager, &text, &source_lang, &target_lang)).await
    }
}
