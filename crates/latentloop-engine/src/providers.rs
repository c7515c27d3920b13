use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use latentloop_contracts::config::{InferenceSettings, SearchConfig};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use sha2::{Digest, Sha256};

/// The remote generative model: a seed vector in, encoded image bytes out.
///
/// Implementations own their retry policy; an `Err` means the candidate is
/// lost and the caller substitutes a placeholder.
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, model: &str, seed: &[f32]) -> Result<Vec<u8>>;
}

#[derive(Default)]
pub struct InferenceProviderRegistry {
    providers: BTreeMap<String, Box<dyn InferenceProvider>>,
}

impl InferenceProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: InferenceProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn InferenceProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Registers the offline provider and, unless `offline`, the HTTP one.
pub fn default_provider_registry(
    config: &SearchConfig,
    offline: bool,
) -> Result<InferenceProviderRegistry> {
    let mut providers = InferenceProviderRegistry::new();
    let [width, height] = config.dryrun.size;
    providers.register(DryrunProvider::new(width, height));
    if !offline {
        providers.register(HttpInferenceProvider::new(&config.inference)?);
    }
    Ok(providers)
}

/// Raw little-endian `f32` encoding sent on the wire.
pub fn seed_to_le_bytes(seed: &[f32]) -> Vec<u8> {
    seed.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Short stable identifier for a seed, used in events and summaries.
pub fn seed_fingerprint(seed: &[f32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed_to_le_bytes(seed));
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

/// Synthesizes images locally. Nearby seeds give similar colors and
/// patterns, so a search converges visibly without a GPU.
pub struct DryrunProvider {
    width: u32,
    height: u32,
}

impl DryrunProvider {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

impl InferenceProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, _model: &str, seed: &[f32]) -> Result<Vec<u8>> {
        let image = dryrun_image(self.width, self.height, seed);
        encode_png(&image)
    }
}

fn dryrun_image(width: u32, height: u32, seed: &[f32]) -> RgbImage {
    let channel_mean = |phase: usize| -> f32 {
        let values = seed
            .iter()
            .skip(phase)
            .step_by(3)
            .copied()
            .collect::<Vec<f32>>();
        if values.is_empty() {
            return 0.0;
        }
        // Rescaled so a standard-normal seed maps to a spread of colors.
        values.iter().sum::<f32>() / (values.len() as f32).sqrt()
    };
    let squash = |value: f32| 1.0 / (1.0 + (-value).exp());
    let base = [
        squash(channel_mean(0)),
        squash(channel_mean(1)),
        squash(channel_mean(2)),
    ];
    let freq_x = 1.0 + seed.first().copied().unwrap_or(0.0).abs() * 3.0;
    let freq_y = 1.0 + seed.get(1).copied().unwrap_or(0.0).abs() * 3.0;

    RgbImage::from_fn(width, height, |x, y| {
        let u = x as f32 / width as f32;
        let v = y as f32 / height as f32;
        let shade = 0.5 + 0.5 * (u * freq_x * PI).sin() * (v * freq_y * PI).cos();
        let level = 0.6 + 0.4 * shade;
        Rgb(base.map(|channel| (channel * level * 255.0).clamp(0.0, 255.0) as u8))
    })
}

pub(crate) fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode png")?;
    Ok(bytes)
}

/// Posts seeds to `<endpoint>/generate/` as multipart form data.
///
/// Every non-success status or transport error counts as one attempt; the
/// last failure is returned once `attempts` are used up.
pub struct HttpInferenceProvider {
    endpoint: String,
    attempts: u32,
    retry_delay: Duration,
    http: HttpClient,
}

impl HttpInferenceProvider {
    pub fn new(settings: &InferenceSettings) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(settings.timeout_s.max(1.0))
            .with_context(|| format!("invalid inference timeout {}", settings.timeout_s))?;
        let retry_delay = Duration::try_from_secs_f64(settings.retry_delay_s)
            .with_context(|| {
                format!("invalid inference retry delay {}", settings.retry_delay_s)
            })?;
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build inference http client")?;
        Ok(Self {
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            attempts: settings.attempts.max(1),
            retry_delay,
            http,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/generate/", self.endpoint)
    }

    fn post_once(&self, url: &str, model: &str, seed_bytes: &[u8]) -> Result<Vec<u8>> {
        let seed_part = MultipartPart::bytes(seed_bytes.to_vec())
            .file_name("seed.bin")
            .mime_str("application/octet-stream")?;
        let form = MultipartForm::new()
            .text("model", model.to_string())
            .part("seed", seed_part);
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .with_context(|| format!("inference request failed ({url})"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "inference request failed ({}): {}",
                status.as_u16(),
                truncate_text(body.trim(), 512)
            ));
        }
        let bytes = response
            .bytes()
            .context("inference response body read failed")?;
        Ok(bytes.to_vec())
    }
}

impl InferenceProvider for HttpInferenceProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn generate(&self, model: &str, seed: &[f32]) -> Result<Vec<u8>> {
        let url = self.generate_url();
        let seed_bytes = seed_to_le_bytes(seed);
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.post_once(&url, model, &seed_bytes) {
                Ok(bytes) => return Ok(bytes),
                Err(err) => last_error = Some(err),
            }
            if attempt < self.attempts && !self.retry_delay.is_zero() {
                thread::sleep(self.retry_delay);
            }
        }

        let err = last_error.unwrap_or_else(|| anyhow!("inference request was never sent"));
        Err(err.context(format!(
            "inference failed after {} attempt(s)",
            self.attempts
        )))
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
