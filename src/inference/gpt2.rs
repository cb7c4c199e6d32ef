use candle::{DType, Device, IndexOp, Module, Tensor, D};
use candle_nn::{embedding, layer_norm, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

// ---------------------------------------------------------
// Config (subset of the Hugging Face GPT-2 config.json)
// ---------------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub n_inner: Option<usize>,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

// ---------------------------------------------------------
// Per-request key/value cache
// ---------------------------------------------------------
pub struct KvCache {
    layers: Vec<Option<(Tensor, Tensor)>>,
    seq_len: usize,
}

impl KvCache {
    pub fn new(n_layer: usize) -> Self {
        Self {
            layers: vec![None; n_layer],
            seq_len: 0,
        }
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }
}

/// HF stores GPT-2 projections as Conv1D with a `[in, out]` weight.
fn conv1d_linear(n_in: usize, n_out: usize, vb: VarBuilder) -> candle::Result<Linear> {
    let weight = vb.get((n_in, n_out), "weight")?.t()?.contiguous()?;
    let bias = vb.get(n_out, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

fn causal_mask(
    seq_len: usize,
    past: usize,
    dtype: DType,
    device: &Device,
) -> candle::Result<Option<Tensor>> {
    if seq_len == 1 {
        return Ok(None);
    }
    let total = past + seq_len;
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| {
            (0..total).map(move |j| if j > past + i { f32::NEG_INFINITY } else { 0.0 })
        })
        .collect();
    Tensor::from_slice(&mask, (seq_len, total), device)?
        .to_dtype(dtype)
        .map(Some)
}

struct Attention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn load(cfg: &Config, vb: VarBuilder) -> candle::Result<Self> {
        let e = cfg.n_embd;
        Ok(Self {
            c_attn: conv1d_linear(e, 3 * e, vb.pp("c_attn"))?,
            c_proj: conv1d_linear(e, e, vb.pp("c_proj"))?,
            n_head: cfg.n_head,
            head_dim: e / cfg.n_head,
        })
    }

    fn split_heads(&self, x: &Tensor) -> candle::Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        x.reshape((b, t, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(
        &self,
        x: &Tensor,
        mask: Option<&Tensor>,
        cache: &mut Option<(Tensor, Tensor)>,
    ) -> candle::Result<Tensor> {
        let (b, t, c) = x.dims3()?;
        let qkv = self.c_attn.forward(x)?;
        let q = self.split_heads(&qkv.narrow(D::Minus1, 0, c)?)?;
        let k = self.split_heads(&qkv.narrow(D::Minus1, c, c)?)?;
        let v = self.split_heads(&qkv.narrow(D::Minus1, 2 * c, c)?)?;

        let (k, v) = match cache.take() {
            Some((past_k, past_v)) => (
                Tensor::cat(&[&past_k, &k], 2)?,
                Tensor::cat(&[&past_v, &v], 2)?,
            ),
            None => (k, v),
        };
        *cache = Some((k.clone(), v.clone()));

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let att = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let att = match mask {
            Some(m) => att.broadcast_add(m)?,
            None => att,
        };
        let att = candle_nn::ops::softmax(&att, D::Minus1)?;

        let y = att
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, c))?;
        self.c_proj.forward(&y)
    }
}

struct Mlp {
    c_fc: Linear,
    c_proj: Linear,
}

impl Mlp {
    fn load(cfg: &Config, vb: VarBuilder) -> candle::Result<Self> {
        let inner = cfg.n_inner.unwrap_or(4 * cfg.n_embd);
        Ok(Self {
            c_fc: conv1d_linear(cfg.n_embd, inner, vb.pp("c_fc"))?,
            c_proj: conv1d_linear(inner, cfg.n_embd, vb.pp("c_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> candle::Result<Tensor> {
        // gelu_new: tanh approximation
        self.c_proj.forward(&self.c_fc.forward(x)?.gelu()?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(cfg: &Config, vb: VarBuilder) -> candle::Result<Self> {
        Ok(Self {
            ln_1: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_1"))?,
            attn: Attention::load(cfg, vb.pp("attn"))?,
            ln_2: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_2"))?,
            mlp: Mlp::load(cfg, vb.pp("mlp"))?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        mask: Option<&Tensor>,
        cache: &mut Option<(Tensor, Tensor)>,
    ) -> candle::Result<Tensor> {
        let x = (x + self.attn.forward(&self.ln_1.forward(x)?, mask, cache)?)?;
        &x + self.mlp.forward(&self.ln_2.forward(&x)?)?
    }
}

// ---------------------------------------------------------
// Model
// ---------------------------------------------------------

/// GPT-2 family decoder (gpt2, distilgpt2, ...).
///
/// Weights are read-only after load, so one instance can serve several
/// generations at once as long as each brings its own [`KvCache`].
pub struct Gpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    config: Config,
}

impl Gpt2 {
    pub fn load(vb: VarBuilder, cfg: &Config) -> candle::Result<Self> {
        // LM-head checkpoints nest the decoder under `transformer.`
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let wte = embedding(cfg.vocab_size, cfg.n_embd, vb.pp("wte"))?;
        let wpe = embedding(cfg.n_positions, cfg.n_embd, vb.pp("wpe"))?;
        let blocks = (0..cfg.n_layer)
            .map(|i| Block::load(cfg, vb.pp(format!("h.{i}"))))
            .collect::<candle::Result<Vec<_>>>()?;
        let ln_f = layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_f"))?;

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            config: cfg.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn new_cache(&self) -> KvCache {
        KvCache::new(self.config.n_layer)
    }

    /// Runs `input_ids` (shape `[batch, seq]`) after whatever is already in
    /// `cache` and returns next-token logits for the last position,
    /// shape `[batch, vocab]`.
    pub fn forward(&self, input_ids: &Tensor, cache: &mut KvCache) -> candle::Result<Tensor> {
        let (_b, t) = input_ids.dims2()?;
        let past = cache.seq_len;
        if t == 0 {
            return Err(candle::Error::Msg("empty input sequence".into()));
        }
        if past + t > self.config.n_positions {
            return Err(candle::Error::Msg(format!(
                "sequence of {} tokens exceeds the model context of {}",
                past + t,
                self.config.n_positions
            )));
        }

        let device = input_ids.device();
        let positions = Tensor::arange(past as u32, (past + t) as u32, device)?;
        let mut h = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = causal_mask(t, past, h.dtype(), device)?;
        for (block, layer_cache) in self.blocks.iter().zip(cache.layers.iter_mut()) {
            h = block.forward(&h, mask.as_ref(), layer_cache)?;
        }
        cache.seq_len += t;

        let h = self.ln_f.forward(&h)?;
        let last = h.i((.., t - 1, ..))?;
        // tied LM head
        last.matmul(&self.wte.embeddings().t()?)
    }
}
