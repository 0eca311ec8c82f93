// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Builds, saves, and loads the word-level tokenizer.
//
// In tokenizers 0.15, train_from_files requires Trainer::Model
// to equal ModelWrapper; building the tokenizer JSON directly
// and loading it sidesteps the type mismatch entirely.
//
// Fixed special ids:
//   0  <pad>           — also the mask-builder's padding id
//   1  <unk>
//   2  <|endoftext|>   — appended after every answer span
//
// Word splitting at vocabulary-build time mirrors the
// Whitespace pre-tokenizer (alphanumeric runs and punctuation
// runs as separate tokens), so "runs." yields "runs" and "."
// in both places.

use anyhow::{anyhow, Context, Result};
use std::{collections::HashMap, path::PathBuf};
use tokenizers::Tokenizer;

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const EOS_TOKEN: &str = "<|endoftext|>";

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const EOS_ID: u32 = 2;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: PathBuf::from(dir.into()) }
    }

    /// Load existing tokenizer or build a new one from texts.
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        let tok_path = self.dir.join("tokenizer.json");
        if tok_path.exists() {
            tracing::info!("Loading existing tokenizer from disk");
            self.load()
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    /// Load a previously saved tokenizer from its JSON file.
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.dir.join("tokenizer.json");
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    /// Build a word-level vocabulary from the corpus texts and
    /// write the tokenizer JSON.
    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir).ok();

        // count every word-level token in the corpus
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for word in split_words(text) {
                *freq.entry(word).or_insert(0) += 1;
            }
        }

        // most frequent first; ties broken alphabetically so the
        // vocabulary is stable across runs
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size.saturating_sub(3));

        let ordered: Vec<&str> = words.iter().map(|(w, _)| w.as_str()).collect();
        let json = tokenizer_json(&ordered);

        let tok_path = self.dir.join("tokenizer.json");
        std::fs::write(&tok_path, serde_json::to_string_pretty(&json)?)
            .with_context(|| "Cannot write tokenizer JSON")?;
        tracing::info!(
            "Tokenizer built with {} entries, saved to '{}'",
            ordered.len() + 3,
            tok_path.display()
        );

        Tokenizer::from_file(&tok_path)
            .map_err(|e| anyhow!("Cannot reload tokenizer: {e}"))
    }
}

/// Split a text the way the Whitespace pre-tokenizer will:
/// lowercased alphanumeric runs and punctuation runs.
fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut current_alnum = false;
    for c in text.to_lowercase().chars() {
        if c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let alnum = c.is_alphanumeric();
        if !current.is_empty() && alnum != current_alnum {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
        current_alnum = alnum;
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn tokenizer_json(words: &[&str]) -> serde_json::Value {
    let mut vocab = serde_json::Map::new();
    vocab.insert(PAD_TOKEN.into(), serde_json::json!(PAD_ID));
    vocab.insert(UNK_TOKEN.into(), serde_json::json!(UNK_ID));
    vocab.insert(EOS_TOKEN.into(), serde_json::json!(EOS_ID));
    let mut next_id = 3u32;
    for &word in words {
        if !vocab.contains_key(word) {
            vocab.insert(word.into(), serde_json::json!(next_id));
            next_id += 1;
        }
    }

    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": PAD_ID, "content": PAD_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": UNK_ID, "content": UNK_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": EOS_ID, "content": EOS_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": { "type": "Lowercase" },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": serde_json::Value::Object(vocab),
            "unk_token": UNK_TOKEN
        }
    })
}

/// Resolve a token's id, failing loudly when it is missing from
/// the vocabulary.
pub fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .with_context(|| format!("token '{}' is not in the vocabulary", token))
}

/// Build an in-memory word-level tokenizer from raw phrases,
/// without touching disk.
pub fn build_word_level(phrases: &[&str]) -> Result<Tokenizer> {
    let mut ordered = Vec::new();
    for phrase in phrases {
        for word in split_words(phrase) {
            if !ordered.contains(&word) {
                ordered.push(word);
            }
        }
    }
    let refs: Vec<&str> = ordered.iter().map(String::as_str).collect();
    let bytes = serde_json::to_vec(&tokenizer_json(&refs))?;
    Tokenizer::from_bytes(&bytes).map_err(|e| anyhow!("Cannot build tokenizer: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words_separates_punctuation() {
        assert_eq!(split_words("A dog runs."), vec!["a", "dog", "runs", "."]);
        assert_eq!(split_words("what's this?"), vec!["what", "'", "s", "this", "?"]);
    }

    #[test]
    fn test_special_ids_are_fixed() {
        let tok = build_word_level(&["a dog runs."]).unwrap();
        assert_eq!(token_id(&tok, PAD_TOKEN).unwrap(), PAD_ID);
        assert_eq!(token_id(&tok, UNK_TOKEN).unwrap(), UNK_ID);
        assert_eq!(token_id(&tok, EOS_TOKEN).unwrap(), EOS_ID);
    }

    #[test]
    fn test_vocab_build_matches_encode_splitting() {
        let tok = build_word_level(&["a dog runs."]).unwrap();
        let ids = tok.encode("a dog runs.", false).unwrap();
        // every surface token was seen at build time, so no <unk>
        assert!(!ids.get_ids().contains(&UNK_ID));
        assert_eq!(ids.get_ids().len(), 4);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let tok = build_word_level(&["a dog runs fast"]).unwrap();
        let ids = tok.encode("A Dog RUNS fast", false).unwrap();
        let text = tok.decode(ids.get_ids(), true).unwrap();
        // lowercase-normalized text survives the full trip
        assert_eq!(text, "a dog runs fast");
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path().to_string_lossy().to_string());
        let texts = vec!["a man rides a horse.".to_string(), "a blue sky.".to_string()];
        let built = store.load_or_build(&texts, 100).unwrap();
        let reloaded = store.load().unwrap();
        assert_eq!(
            built.token_to_id("horse").unwrap(),
            reloaded.token_to_id("horse").unwrap()
        );
    }
}
