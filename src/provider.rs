use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

use crate::error::{Error, Result};
use crate::settings::ApiConfig;

/// User input classified by kind, as handed over by the session store.
#[derive(Debug, Clone)]
pub enum UserInput {
    Text(String),
    Audio { wav: Vec<u8>, transcript: Option<String> },
    Image { bytes: Vec<u8>, filename: String },
}

/// Normalized bot reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReply {
    pub text: String,
    pub speakable: bool,
}

#[async_trait]
pub trait ResponseProvider: Send + Sync {
    async fn respond(&self, input: UserInput) -> Result<BotReply>;
}

/// Accepted reply field names, in priority order. Backends disagree on the
/// field carrying the answer, so tolerance for the variation lives here and
/// nowhere else.
const REPLY_FIELDS: [&str; 3] = ["answer", "response", "respuesta"];

fn normalize_reply(value: &serde_json::Value, fallback: &str) -> Result<BotReply> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::MalformedResponse(format!("expected object, got {value}")))?;
    let text = REPLY_FIELDS
        .iter()
        .find_map(|f| obj.get(*f).and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
        .unwrap_or(fallback)
        .to_string();
    let speakable = obj.get("speakable").and_then(|v| v.as_bool()).unwrap_or(true);
    Ok(BotReply { text, speakable })
}

/// Remote backend: one endpoint per input kind, static `x-app-auth` header.
pub struct RemoteProvider {
    client: reqwest::Client,
    config: ApiConfig,
}

impl RemoteProvider {
    pub fn new(config: ApiConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => rb.header("x-app-auth", key),
            None => rb,
        }
    }

    async fn query_text(&self, text: &str) -> Result<BotReply> {
        let resp = self
            .authed(self.client.post(self.url("/query")))
            .json(&json!({ "query": text, "filters": {} }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        normalize_reply(&body, "No se pudo obtener respuesta.")
    }

    async fn ask_audio(&self, wav: Vec<u8>) -> Result<BotReply> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part("audio_file", part);
        let resp = self
            .authed(self.client.post(self.url("/ask_audio")))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        normalize_reply(&body, "No se pudo procesar el audio.")
    }

    async fn ask_image(&self, bytes: Vec<u8>, filename: String) -> Result<BotReply> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("image_file", part);
        let resp = self
            .authed(self.client.post(self.url("/ask/image")))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        normalize_reply(&body, "No se pudo procesar la imagen.")
    }
}

#[async_trait]
impl ResponseProvider for RemoteProvider {
    async fn respond(&self, input: UserInput) -> Result<BotReply> {
        match input {
            UserInput::Text(text) => self.query_text(&text).await,
            // a usable transcript goes through the text endpoint: cheaper and
            // more accurate than a raw audio upload
            UserInput::Audio { transcript: Some(t), .. } if !t.trim().is_empty() => {
                self.query_text(&t).await
            }
            UserInput::Audio { wav, .. } => self.ask_audio(wav).await,
            UserInput::Image { bytes, filename } => self.ask_image(bytes, filename).await,
        }
    }
}

const DEFAULT_REPLY: &str =
    "No tengo una respuesta específica para esa pregunta. ¿Puedo ayudarte con alguna otra consulta?";

const R_HOLA: &str = "¡Hola! ¿En qué puedo ayudarte hoy?";
const R_ADIOS: &str = "¡Hasta luego! Espero haber sido de ayuda.";
const R_GRACIAS: &str = "No hay de qué. ¡Estoy aquí para ayudar!";
const R_DNI: &str = "Puedes renovar tu DNI en cualquier oficina de documentación. Necesitas llevar el DNI anterior y una prueba de domicilio.";
const R_ROBO: &str = "Para denunciar un robo, debes acudir a la comisaría más cercana con tu identificación. También puedes iniciar la denuncia a través de la web oficial de la Policía.";
const R_COMISARIA: &str = "Para encontrar la comisaría más cercana, puedes utilizar el mapa en la web oficial de la Policía o llamar al 091 para información.";
const R_PASAPORTE: &str = "Para solicitar el pasaporte necesitas: DNI en vigor, una fotografía reciente, el justificante de pago de la tasa y cita previa en la oficina de expedición.";
const R_HORARIO: &str = "El horario general de atención al público en comisarías es de 09:00 a 14:00 y de 16:00 a 18:00, de lunes a viernes. Para trámites específicos puede variar.";

/// Phrase table, matched exactly and by containment, in this order.
const RESPONSES: [(&str, &str); 12] = [
    ("hola", R_HOLA),
    ("como estas", "Estoy funcionando perfectamente, gracias por preguntar. ¿En qué puedo ayudarte?"),
    ("quien eres", "Soy un asistente virtual diseñado para responder a tus consultas y ayudarte con tus tareas."),
    ("que hora es", "No puedo saber la hora exacta, pero puedes mirar el reloj de tu dispositivo."),
    ("adios", R_ADIOS),
    ("gracias", R_GRACIAS),
    ("cuando puedo renovar mi dni", R_DNI),
    ("como denunciar un robo", R_ROBO),
    ("donde queda la comisaria mas cercana", R_COMISARIA),
    ("requisitos para pasaporte", R_PASAPORTE),
    ("horario de atencion", R_HORARIO),
    ("que es un apercimiento", "En el contexto del Decreto número 53 del año 2017 de la Ciudad Autónoma de Buenos Aires, que reglamenta el régimen disciplinario de la Policía de la Ciudad, un apercibimiento es una sanción disciplinaria aplicada por la comisión de una falta leve."),
];

/// Keyword groups tried after exact and containment matching.
const KEYWORD_GROUPS: [(&[&str], &str); 8] = [
    (&["dni", "renovar"], R_DNI),
    (&["robo", "denuncia", "denunciar", "robaron"], R_ROBO),
    (&["comisaria", "comisaría", "policía", "cercana"], R_COMISARIA),
    (&["pasaporte", "requisitos", "sacar"], R_PASAPORTE),
    (&["horario", "atención", "atencion", "abierto"], R_HORARIO),
    (&["hola", "saludos", "buenos días", "buenas"], R_HOLA),
    (&["adios", "chau", "hasta luego"], R_ADIOS),
    (&["gracias", "agradecido"], R_GRACIAS),
];

fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .trim()
        .chars()
        .filter(|c| !matches!(c, '¿' | '?' | '¡' | '!' | '.' | ',' | ';' | ':'))
        .collect()
}

/// Answers from a fixed phrase table: exact match, then containment, then
/// keyword groups, then a default reply.
pub fn hardcoded_response(question: &str) -> &'static str {
    let normalized = normalize_question(question);
    if normalized.is_empty() {
        return DEFAULT_REPLY;
    }
    if let Some(&(_, reply)) = RESPONSES.iter().find(|(k, _)| *k == normalized) {
        return reply;
    }
    if let Some(&(_, reply)) = RESPONSES.iter().find(|(k, _)| normalized.contains(k)) {
        return reply;
    }
    for (words, reply) in KEYWORD_GROUPS {
        if words.iter().any(|w| normalized.contains(w)) {
            return reply;
        }
    }
    DEFAULT_REPLY
}

/// Offline/demo backend answering from the phrase table. Simulates network
/// latency so the loading-indicator flow behaves like the remote path.
pub struct HardcodedProvider {
    delay: Option<std::ops::RangeInclusive<u64>>,
}

impl Default for HardcodedProvider {
    fn default() -> Self {
        Self { delay: Some(500..=1000) }
    }
}

impl HardcodedProvider {
    /// No simulated latency; used in tests.
    pub fn instant() -> Self {
        Self { delay: None }
    }
}

#[async_trait]
impl ResponseProvider for HardcodedProvider {
    async fn respond(&self, input: UserInput) -> Result<BotReply> {
        if let Some(range) = &self.delay {
            let millis = rand::thread_rng().gen_range(range.clone());
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        let text = match &input {
            UserInput::Text(text) => hardcoded_response(text),
            UserInput::Audio { transcript, .. } => {
                hardcoded_response(transcript.as_deref().unwrap_or("audio input"))
            }
            UserInput::Image { .. } => hardcoded_response("image input"),
        };
        Ok(BotReply { text: text.to_string(), speakable: true })
    }
}
