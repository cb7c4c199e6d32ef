use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use rand::Rng;
use tokenizers::{PaddingParams, Tokenizer};
use tracing::{debug, info};

use super::gpt2::{Config as Gpt2Config, Gpt2};
use super::{EngineError, EngineHandle, TextGenerator};
use crate::config::DevicePreference;

pub const DEFAULT_MODEL_ID: &str = "distilgpt2";
pub const TEMPERATURE: f64 = 0.7;
pub const TOP_K: usize = 50;
const EOS_TOKEN: &str = "<|endoftext|>";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub model_id: String,
    pub revision: String,
    pub device: DevicePreference,
    pub seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            device: DevicePreference::Cpu,
            seed: None,
        }
    }
}

pub struct LoadedModel {
    model: Gpt2,
    tokenizer: Tokenizer,
    eos_token_id: u32,
}

struct Artifacts {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

// ---------------------------------------------------------
// PUBLIC SERVICE
// ---------------------------------------------------------
pub struct LlmEngine {
    options: EngineOptions,
    device: Device,
    handle: EngineHandle<LoadedModel>,
}

impl LlmEngine {
    /// Picks the device up front; the model itself is fetched on first use.
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        let device = match options.device {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(|e| {
                EngineError::ModelLoad(format!(
                    "failed to initialize CUDA device {ordinal} ({e}); build with the `cuda` feature"
                ))
            })?,
        };

        Ok(Self {
            options,
            device,
            handle: EngineHandle::new(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.options.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_loaded()
    }

    /// Loads tokenizer and weights on the first call; later calls return the
    /// same instance. A failed load is not cached.
    pub fn ensure_loaded(&self) -> Result<&LoadedModel, EngineError> {
        self.handle.get_or_load(|| self.load())
    }

    fn load(&self) -> Result<LoadedModel, EngineError> {
        let started = Instant::now();
        info!(
            model = %self.options.model_id,
            revision = %self.options.revision,
            device = ?self.device,
            "loading model (first use)"
        );

        let artifacts = resolve_artifacts(&self.options.model_id, &self.options.revision)?;
        debug!(
            config = %artifacts.config.display(),
            tokenizer = %artifacts.tokenizer.display(),
            weights = %artifacts.weights.display(),
            "model artifacts resolved"
        );

        let raw = std::fs::read(&artifacts.config).map_err(load_err("read config.json"))?;
        let cfg: Gpt2Config =
            serde_json::from_slice(&raw).map_err(load_err("parse config.json"))?;

        let mut tokenizer = Tokenizer::from_file(&artifacts.tokenizer)
            .map_err(load_err("load tokenizer.json"))?;
        let eos_token_id = tokenizer
            .token_to_id(EOS_TOKEN)
            .or(cfg.eos_token_id)
            .ok_or_else(|| EngineError::ModelLoad("tokenizer has no EOS token".into()))?;
        // GPT-2 ships without a pad token; reuse EOS
        tokenizer.with_padding(Some(PaddingParams {
            pad_id: eos_token_id,
            pad_token: EOS_TOKEN.to_string(),
            ..Default::default()
        }));

        let dtype = if self.device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&artifacts.weights], dtype, &self.device)
                .map_err(load_err("mmap model.safetensors"))?
        };
        let model = Gpt2::load(vb, &cfg).map_err(load_err("build model"))?;

        info!(
            model = %self.options.model_id,
            layers = cfg.n_layer,
            context = cfg.n_positions,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );

        Ok(LoadedModel {
            model,
            tokenizer,
            eos_token_id,
        })
    }

    fn seed(&self) -> u64 {
        self.options
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen())
    }

    fn sample(
        &self,
        loaded: &LoadedModel,
        tokens: &mut Vec<u32>,
        budget: usize,
    ) -> candle::Result<()> {
        let mut sampler = LogitsProcessor::from_sampling(
            self.seed(),
            Sampling::TopK {
                k: TOP_K,
                temperature: TEMPERATURE,
            },
        );
        let mut cache = loaded.model.new_cache();

        for _ in 0..budget {
            // whole prompt first, then one token at a time
            let ctx = if cache.seq_len() == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(ctx, &self.device)?.unsqueeze(0)?;
            let logits = loaded
                .model
                .forward(&input, &mut cache)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;

            let next = sampler.sample(&logits)?;
            tokens.push(next);
            if next == loaded.eos_token_id {
                break;
            }
        }
        Ok(())
    }
}

impl TextGenerator for LlmEngine {
    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, EngineError> {
        let loaded = self.ensure_loaded()?;
        let started = Instant::now();

        let encoding = loaded
            .tokenizer
            .encode(prompt, true)
            .map_err(inference_err("tokenizer encode error"))?;
        let mut tokens: Vec<u32> = encoding
            .get_ids()
            .iter()
            .zip(encoding.get_attention_mask())
            .filter(|(_, mask)| **mask == 1)
            .map(|(id, _)| *id)
            .collect();

        if tokens.is_empty() {
            return Err(EngineError::Inference("prompt produced no tokens".into()));
        }

        let prompt_len = tokens.len();
        let context = loaded.model.config().n_positions;
        if prompt_len > context {
            return Err(EngineError::Inference(format!(
                "prompt is {prompt_len} tokens but the model context is {context}"
            )));
        }
        let budget = max_new_tokens.min(context - prompt_len);

        self.sample(loaded, &mut tokens, budget)
            .map_err(inference_err("generation failed"))?;

        let text = loaded
            .tokenizer
            .decode(&tokens, true)
            .map_err(inference_err("tokenizer decode error"))?;

        debug!(
            prompt_tokens = prompt_len,
            new_tokens = tokens.len() - prompt_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation finished"
        );

        Ok(text)
    }
}

// ---------------------------------------------------------
// Helpers
// ---------------------------------------------------------

fn load_err<E: Display>(what: &'static str) -> impl Fn(E) -> EngineError {
    move |e| EngineError::ModelLoad(format!("failed to {what}: {e}"))
}

fn inference_err<E: Display>(what: &'static str) -> impl Fn(E) -> EngineError {
    move |e| EngineError::Inference(format!("{what}: {e}"))
}

/// `model_id` is either a local snapshot directory or a hub repo id.
fn resolve_artifacts(model_id: &str, revision: &str) -> Result<Artifacts, EngineError> {
    let local = Path::new(model_id);
    if local.is_dir() {
        return local_artifacts(local);
    }

    let api = Api::new().map_err(load_err("initialize hub client"))?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));
    let fetch = |name: &str| {
        repo.get(name).map_err(|e| {
            EngineError::ModelLoad(format!("failed to fetch {name} from {model_id}: {e}"))
        })
    };

    Ok(Artifacts {
        config: fetch("config.json")?,
        tokenizer: fetch("tokenizer.json")?,
        weights: fetch("model.safetensors")?,
    })
}

fn local_artifacts(dir: &Path) -> Result<Artifacts, EngineError> {
    let file = |name: &str| {
        let path = dir.join(name);
        if path.exists() {
            Ok(path)
        } else {
            Err(EngineError::ModelLoad(format!(
                "{name} not found under {}",
                dir.display()
            )))
        }
    };

    Ok(Artifacts {
        config: file("config.json")?,
        tokenizer: file("tokenizer.json")?,
        weights: file("model.safetensors")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;
    use serde_json::json;

    const WORDS: [&str; 8] = [EOS_TOKEN, "<unk>", "hello", "world", "the", "a", "cat", "sat"];
    const CONTEXT: usize = 6;

    /// Word-level tokenizer, a 6-position config and weights saved from a `VarMap`.
    /// With `eos_only` every logit but the EOS one is zero.
    fn tiny_snapshot(eos_only: bool) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("llm-generator-tiny-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let vocab: serde_json::Map<String, serde_json::Value> = WORDS
            .iter()
            .enumerate()
            .map(|(id, word)| (word.to_string(), json!(id)))
            .collect();
        let tokenizer = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [{
                "id": 0,
                "content": EOS_TOKEN,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            }],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
        });
        std::fs::write(dir.join("tokenizer.json"), tokenizer.to_string()).unwrap();

        let config = json!({
            "vocab_size": WORDS.len(),
            "n_positions": CONTEXT,
            "n_embd": 8,
            "n_layer": 1,
            "n_head": 2,
            "eos_token_id": 0
        });
        std::fs::write(dir.join("config.json"), config.to_string()).unwrap();
        let cfg: Gpt2Config = serde_json::from_value(config).unwrap();

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Gpt2::load(vb, &cfg).unwrap();

        if eos_only {
            for var in varmap.all_vars() {
                var.set(&var.zeros_like().unwrap()).unwrap();
            }
            // final hidden state is all ones, so logits are the row sums of wte
            let mut wte = vec![0f32; cfg.vocab_size * cfg.n_embd];
            wte[..cfg.n_embd].fill(10.0);
            varmap
                .set_one(
                    "wte.weight",
                    Tensor::from_vec(wte, (cfg.vocab_size, cfg.n_embd), &Device::Cpu).unwrap(),
                )
                .unwrap();
            varmap
                .set_one(
                    "ln_f.bias",
                    Tensor::ones(cfg.n_embd, DType::F32, &Device::Cpu).unwrap(),
                )
                .unwrap();
        } else {
            for var in varmap.all_vars() {
                let noise =
                    Tensor::randn(0f32, 0.5f32, var.shape().clone(), &Device::Cpu).unwrap();
                var.set(&noise).unwrap();
            }
        }
        varmap.save(dir.join("model.safetensors")).unwrap();
        dir
    }

    fn local_engine(dir: &Path) -> LlmEngine {
        LlmEngine::new(EngineOptions {
            model_id: dir.to_string_lossy().into_owned(),
            seed: Some(42),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn local_snapshot_generates_within_the_context() {
        let dir = tiny_snapshot(false);
        let engine = local_engine(&dir);

        let text = engine.generate("hello world", 10).unwrap();
        assert!(text.starts_with("hello world"), "got {text:?}");
        assert!(!text.contains(EOS_TOKEN), "got {text:?}");
        // budget is clipped to the 4 free positions
        assert!(text.split_whitespace().count() - 2 <= CONTEXT - 2, "got {text:?}");
        assert!(engine.is_loaded());

        let text = engine.generate("the cat sat", 1).unwrap();
        assert!(text.starts_with("the cat sat"), "got {text:?}");
        assert!(text.split_whitespace().count() <= 4, "got {text:?}");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn prompt_filling_the_context_comes_back_unchanged() {
        let dir = tiny_snapshot(false);
        let engine = local_engine(&dir);

        let full = "hello world the a cat sat";
        assert_eq!(engine.generate(full, 50).unwrap(), full);

        let err = engine.generate("hello world the a cat sat hello", 5).unwrap_err();
        assert!(matches!(err, EngineError::Inference(_)));
        assert_eq!(
            err.to_string(),
            "prompt is 7 tokens but the model context is 6"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn eos_stops_generation_and_is_not_decoded() {
        let dir = tiny_snapshot(true);
        let engine = local_engine(&dir);

        let loaded = engine.ensure_loaded().unwrap();
        let mut tokens = vec![2, 3];
        engine.sample(loaded, &mut tokens, 4).unwrap();
        assert_eq!(tokens, vec![2, 3, 0]);

        assert_eq!(engine.generate("hello world", 4).unwrap(), "hello world");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_local_snapshot_is_a_load_error_and_retryable() {
        let dir = std::env::temp_dir().join(format!("llm-generator-empty-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let engine = LlmEngine::new(EngineOptions {
            model_id: dir.to_string_lossy().into_owned(),
            ..Default::default()
        })
        .unwrap();

        for _ in 0..2 {
            let err = engine.generate("Hello", 5).unwrap_err();
            assert!(matches!(err, EngineError::ModelLoad(_)));
            assert!(err.to_string().contains("config.json not found"));
            assert!(!engine.is_loaded());
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn defaults_to_distilgpt2_on_cpu() {
        let engine = LlmEngine::new(EngineOptions::default()).unwrap();
        assert_eq!(engine.model_id(), "distilgpt2");
        assert!(!engine.is_loaded());
    }

    // Downloads distilgpt2 from the hub.
    #[test]
    #[ignore]
    fn generates_continuation_after_prompt() {
        let engine = LlmEngine::new(EngineOptions {
            seed: Some(299792458),
            ..Default::default()
        })
        .unwrap();

        let first = Instant::now();
        let text = engine.generate("Hello", 10).expect("generation failed");
        let first_elapsed = first.elapsed();
        assert!(text.starts_with("Hello"), "got {text:?}");
        assert!(text.len() > "Hello".len());
        assert!(engine.is_loaded());

        let second = Instant::now();
        let again = engine.generate("Hello", 10).expect("generation failed");
        assert!(again.starts_with("Hello"));
        assert!(second.elapsed() < first_elapsed);
    }
}
