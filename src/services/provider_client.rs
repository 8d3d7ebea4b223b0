//! services/provider_client.rs
//! Cliente del proveedor de WhatsApp (sesiones por token) y el gateway que
//! aplica timeout a cada llamada remota.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        credential_model::Credential,
        identity_model::{ProxyConfig, RemoteSession, RemoteStatus},
        queue_model::MessagePayload,
        send_model::SendOutcome,
    },
};

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn create_session(
        &self,
        credential: &Credential,
        session_name: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<String>;

    /// `Err(Gone)` si el token ya no existe o es inválido.
    async fn get_status(
        &self,
        credential: &Credential,
        token: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<RemoteStatus>;

    async fn send_message(
        &self,
        credential: &Credential,
        token: &str,
        target: &str,
        payload: &MessagePayload,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<SendOutcome>;

    async fn delete_session(
        &self,
        credential: &Credential,
        token: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<()>;

    async fn list_sessions(&self, credential: &Credential) -> DispatchResult<Vec<RemoteSession>>;
}

/// Resultado de una llamada best-effort: se hizo, o falló pero se puede seguir.
/// Los fallos que obligan a abortar se devuelven como `Err`.
#[derive(Debug)]
pub enum RemoteOutcome<T> {
    Done(T),
    Skipped(DispatchError),
}

impl<T> RemoteOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, RemoteOutcome::Done(_))
    }
}

/// Envoltorio con timeout sobre el cliente del proveedor. No guarda estado
/// compartido entre llamadas, así que nunca se sostiene un lock mientras espera red.
#[derive(Clone)]
pub struct ProviderGateway {
    client: Arc<dyn ProviderClient>,
    timeout: Duration,
}

impl ProviderGateway {
    pub fn new(client: Arc<dyn ProviderClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn guarded<T, F>(&self, op: &str, fut: F) -> DispatchResult<T>
    where
        F: Future<Output = DispatchResult<T>>,
    {
        match timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(DispatchError::RemoteUnavailable(format!(
                "{op} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    pub async fn create_session(
        &self,
        credential: &Credential,
        session_name: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<String> {
        self.guarded(
            "create_session",
            self.client.create_session(credential, session_name, proxy),
        )
        .await
    }

    pub async fn get_status(
        &self,
        credential: &Credential,
        token: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<RemoteStatus> {
        self.guarded("get_status", self.client.get_status(credential, token, proxy))
            .await
    }

    pub async fn send_message(
        &self,
        credential: &Credential,
        token: &str,
        target: &str,
        payload: &MessagePayload,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<SendOutcome> {
        self.guarded(
            "send_message",
            self.client
                .send_message(credential, token, target, payload, proxy),
        )
        .await
    }

    pub async fn list_sessions(&self, credential: &Credential) -> DispatchResult<Vec<RemoteSession>> {
        self.guarded("list_sessions", self.client.list_sessions(credential))
            .await
    }

    /// Borrado remoto best-effort. Una sesión que ya no existe cuenta como borrada.
    pub async fn delete_session_best_effort(
        &self,
        credential: &Credential,
        token: &str,
        proxy: Option<&ProxyConfig>,
    ) -> RemoteOutcome<()> {
        match self
            .guarded(
                "delete_session",
                self.client.delete_session(credential, token, proxy),
            )
            .await
        {
            Ok(()) | Err(DispatchError::Gone(_)) => RemoteOutcome::Done(()),
            Err(e) => {
                log::warn!(
                    "(delete_session_best_effort) No se pudo borrar la sesión remota en {}: {}",
                    credential.server_url,
                    e
                );
                RemoteOutcome::Skipped(e)
            }
        }
    }
}

// --------------------------------------------------------------------------------
// Implementación HTTP
// --------------------------------------------------------------------------------

/// Cliente HTTP contra un gateway de WhatsApp por token:
/// header `admintoken` para llamadas de administración y `token` para las de instancia.
#[derive(Clone)]
pub struct HttpProviderClient {
    http_client: Client,
}

impl HttpProviderClient {
    pub fn new() -> Self {
        Self {
            http_client: Client::new(),
        }
    }

    /// Con proxy se arma un cliente dedicado; sin proxy se reutiliza el compartido.
    fn client_for(&self, proxy: Option<&ProxyConfig>) -> DispatchResult<Client> {
        let Some(p) = proxy else {
            return Ok(self.http_client.clone());
        };
        let mut rp = reqwest::Proxy::all(format!("http://{}:{}", p.host, p.port))
            .map_err(|e| DispatchError::Invalid(format!("proxy inválido: {e}")))?;
        if let (Some(user), Some(pass)) = (&p.username, &p.password) {
            rp = rp.basic_auth(user, pass);
        }
        Client::builder()
            .proxy(rp)
            .build()
            .map_err(|e| DispatchError::Internal(e.into()))
    }

    fn url(credential: &Credential, path: &str) -> String {
        format!("{}{}", credential.server_url.trim_end_matches('/'), path)
    }

    /// Envía y devuelve el JSON; mapea status HTTP a la taxonomía de errores.
    async fn exec(&self, op: &str, req: RequestBuilder, token_scoped: bool) -> DispatchResult<Value> {
        let resp = req
            .send()
            .await
            .map_err(|e| DispatchError::RemoteUnavailable(format!("{op}: {e}")))?;

        let status = resp.status();
        log::debug!("({op}) Status code de la respuesta={status}");

        if status.is_success() {
            let body_txt = resp
                .text()
                .await
                .map_err(|e| DispatchError::RemoteUnavailable(format!("{op}: {e}")))?;
            if body_txt.trim().is_empty() {
                return Ok(Value::Null);
            }
            // Una página de error con 200 (proxy, balanceador) no es una respuesta válida
            return serde_json::from_str(&body_txt).map_err(|e| {
                DispatchError::RemoteUnavailable(format!("{op}: respuesta ilegible: {e}"))
            });
        }

        let body_txt = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED if token_scoped => {
                Err(DispatchError::Gone(format!("{op}: {body_txt}")))
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => Err(
                DispatchError::RemoteUnavailable(format!("{op}: HTTP {s}: {body_txt}")),
            ),
            s => Err(DispatchError::Invalid(format!("{op}: HTTP {s}: {body_txt}"))),
        }
    }
}

impl Default for HttpProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.pointer(k))
        .filter_map(|x| x.as_str())
        .map(|s| s.to_string())
        .find(|s| !s.is_empty())
}

/// El owner puede venir como JID ("5562...@s.whatsapp.net"); nos quedamos con los dígitos.
fn phone_from_owner(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.split(['@', ':']).next().unwrap_or_default().to_string())
        .filter(|s| !s.is_empty())
}

fn remote_session_from(v: &Value) -> Option<RemoteSession> {
    let token = str_field(v, &["/token"])?;
    Some(RemoteSession {
        token,
        phone_number: phone_from_owner(str_field(v, &["/owner", "/phone", "/jid"])),
        status: str_field(v, &["/status"]).unwrap_or_else(|| "disconnected".to_string()),
        name: str_field(v, &["/name", "/profileName"]),
    })
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn create_session(
        &self,
        credential: &Credential,
        session_name: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<String> {
        let client = self.client_for(proxy)?;
        let req = client
            .post(Self::url(credential, "/instance/init"))
            .header("admintoken", &credential.admin_token)
            .json(&json!({ "name": session_name }));
        let body = self.exec("create_session", req, false).await?;
        str_field(&body, &["/token", "/instance/token"]).ok_or_else(|| {
            DispatchError::RemoteUnavailable(format!(
                "create_session: respuesta sin token para '{session_name}'"
            ))
        })
    }

    async fn get_status(
        &self,
        credential: &Credential,
        token: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<RemoteStatus> {
        let client = self.client_for(proxy)?;
        let req = client
            .get(Self::url(credential, "/instance/status"))
            .header("token", token);
        let body = self.exec("get_status", req, true).await?;

        let state = str_field(&body, &["/instance/status", "/status", "/state"]);
        let flag = body.pointer("/status/connected").and_then(|v| v.as_bool());
        // Sin ningún campo de estado no se puede afirmar que esté desconectada
        let (state, connected) = match (state, flag) {
            (Some(state), Some(flag)) => (state, flag),
            (Some(state), None) => {
                let connected = state.eq_ignore_ascii_case("connected");
                (state, connected)
            }
            (None, Some(flag)) => {
                let state = if flag { "connected" } else { "disconnected" };
                (state.to_string(), flag)
            }
            (None, None) => {
                return Err(DispatchError::RemoteUnavailable(
                    "get_status: respuesta sin estado".to_string(),
                ))
            }
        };

        Ok(RemoteStatus {
            connected,
            phone_number: phone_from_owner(str_field(
                &body,
                &["/instance/owner", "/status/jid", "/owner"],
            )),
            profile_name: str_field(&body, &["/instance/profileName", "/profileName"]),
            profile_pic_url: str_field(&body, &["/instance/profilePicUrl", "/profilePicUrl"]),
            state: state.to_lowercase(),
        })
    }

    async fn send_message(
        &self,
        credential: &Credential,
        token: &str,
        target: &str,
        payload: &MessagePayload,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<SendOutcome> {
        let client = self.client_for(proxy)?;
        let (path, body) = match payload {
            MessagePayload::Text { text } => (
                "/send/text",
                json!({ "number": target, "text": text }),
            ),
            MessagePayload::Media {
                filename,
                mimetype,
                caption,
                data,
            } => (
                "/send/media",
                json!({
                    "number": target,
                    "type": "document",
                    "docName": filename,
                    "mimetype": mimetype,
                    "text": caption,
                    "file": format!("data:{};base64,{}", mimetype, base64::encode(data)),
                }),
            ),
        };

        let req = client
            .post(Self::url(credential, path))
            .header("token", token)
            .json(&body);

        match self.exec("send_message", req, true).await {
            Ok(resp) => Ok(SendOutcome {
                success: true,
                remote_message_id: str_field(&resp, &["/messageid", "/id", "/key/id"]),
                error: None,
            }),
            // El proveedor rechazó el envío (número inválido, etc.): no es un fallo de red.
            Err(DispatchError::Invalid(msg)) => Ok(SendOutcome {
                success: false,
                remote_message_id: None,
                error: Some(msg),
            }),
            Err(e) => Err(e),
        }
    }

    async fn delete_session(
        &self,
        credential: &Credential,
        token: &str,
        proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<()> {
        let client = self.client_for(proxy)?;
        let req = client
            .delete(Self::url(credential, "/instance"))
            .header("token", token);
        self.exec("delete_session", req, true).await.map(|_| ())
    }

    async fn list_sessions(&self, credential: &Credential) -> DispatchResult<Vec<RemoteSession>> {
        let req = self
            .http_client
            .get(Self::url(credential, "/instance/all"))
            .header("admintoken", &credential.admin_token);
        let body = self.exec("list_sessions", req, false).await?;
        let items = body
            .as_array()
            .or_else(|| body.get("instances").and_then(|v| v.as_array()))
            .ok_or_else(|| {
                DispatchError::RemoteUnavailable(
                    "list_sessions: formato de listado desconocido".to_string(),
                )
            })?;
        Ok(items.iter().filter_map(remote_session_from).collect())
    }
}
