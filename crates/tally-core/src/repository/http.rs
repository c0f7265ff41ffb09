use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{
  ACCEPT,
  CONTENT_TYPE
};
use reqwest::{
  Method,
  StatusCode,
  Url
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tally_shared::{
  ApiResponse,
  Category,
  CreateCategoryRequest,
  CreateTodoRequest,
  Page,
  PaginatedResponse,
  Todo,
  TodoQuery,
  UpdateCategoryRequest,
  UpdateTodoRequest
};
use tracing::{
  debug,
  instrument,
  warn
};

use super::TodoRepository;
use crate::error::{
  Resource,
  Result,
  TallyError
};

const FALLBACK_ERROR_MESSAGE: &str =
  "An error occurred";

/// Adapter for the REST service. Every
/// call goes over the wire; caching is
/// the store's job.
#[derive(Debug, Clone)]
pub struct HttpRepository {
  client:   reqwest::Client,
  base_url: Url
}

impl HttpRepository {
  pub fn new(
    base_url: &str,
    timeout: Duration
  ) -> anyhow::Result<Self> {
    let trimmed =
      base_url.trim().trim_end_matches('/');
    // Trailing slash so `join` appends
    // instead of replacing the last
    // segment.
    let base_url =
      Url::parse(&format!("{trimmed}/"))
        .with_context(|| {
          format!(
            "invalid api url: {base_url}"
          )
        })?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .context(
        "failed building HTTP client"
      )?;

    Ok(Self {
      client,
      base_url
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url(
    &self,
    path: &str
  ) -> Result<Url> {
    self.base_url.join(path).map_err(|err| {
      TallyError::Api {
        code:    0,
        message: format!(
          "invalid request path {path}: \
           {err}"
        )
      }
    })
  }

  /// Sends the request and returns the
  /// raw body of a successful response.
  /// `subject` turns a 404 into
  /// [`TallyError::NotFound`].
  async fn send<B: Serialize + ?Sized>(
    &self,
    method: Method,
    url: Url,
    body: Option<&B>,
    subject: Option<(Resource, i64)>
  ) -> Result<String> {
    let mut request = self
      .client
      .request(method.clone(), url.clone())
      .header(ACCEPT, "application/json");

    if let Some(body) = body {
      let payload = serde_json::to_string(
        body
      )
      .map_err(|err| {
        TallyError::decode(err.to_string())
      })?;
      request = request
        .header(
          CONTENT_TYPE,
          "application/json"
        )
        .body(payload);
    }

    let response =
      match request.send().await {
        | Ok(response) => response,
        | Err(error) => {
          warn!(
            method = %method,
            url = %url,
            error = %error,
            "request got no response"
          );
          return Err(TallyError::network());
        }
      };

    let status = response.status();
    let text = match response.text().await
    {
      | Ok(text) => text,
      | Err(error) => {
        warn!(
          method = %method,
          url = %url,
          status = %status,
          error = %error,
          "failed reading response body"
        );
        return Err(TallyError::network());
      }
    };

    if status.is_success() {
      debug!(
        method = %method,
        url = %url,
        status = %status,
        bytes = text.len(),
        "request succeeded"
      );
      return Ok(text);
    }

    let err =
      error_from_response(status, &text, subject);
    warn!(
      method = %method,
      url = %url,
      status = %status,
      error = %err,
      "request failed"
    );
    Err(err)
  }

  async fn get_data<T: DeserializeOwned>(
    &self,
    path: &str,
    subject: Option<(Resource, i64)>
  ) -> Result<T> {
    let url = self.url(path)?;
    let body = self
      .send::<()>(Method::GET, url, None, subject)
      .await?;
    decode_data(&body)
  }

  async fn send_data<B, T>(
    &self,
    method: Method,
    path: &str,
    body: Option<&B>,
    subject: Option<(Resource, i64)>
  ) -> Result<T>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned
  {
    let url = self.url(path)?;
    let body = self
      .send(method, url, body, subject)
      .await?;
    decode_data(&body)
  }

  async fn delete(
    &self,
    path: &str,
    subject: (Resource, i64)
  ) -> Result<()> {
    let url = self.url(path)?;
    self
      .send::<()>(
        Method::DELETE,
        url,
        None,
        Some(subject)
      )
      .await?;
    Ok(())
  }
}

#[async_trait]
impl TodoRepository for HttpRepository {
  #[instrument(skip(self), fields(query = %query.canonical()))]
  async fn list_todos(
    &self,
    query: &TodoQuery
  ) -> Result<Page<Todo>> {
    let mut url = self.url("todos")?;
    {
      let mut pairs = url.query_pairs_mut();
      for (key, value) in query.to_pairs() {
        pairs.append_pair(key, &value);
      }
    }
    let body = self
      .send::<()>(Method::GET, url, None, None)
      .await?;
    let envelope: PaginatedResponse<Todo> =
      serde_json::from_str(&body).map_err(
        |err| {
          TallyError::decode(err.to_string())
        }
      )?;
    Ok(Page::from(envelope))
  }

  #[instrument(skip(self))]
  async fn get_todo(
    &self,
    id: i64
  ) -> Result<Todo> {
    self
      .get_data(
        &format!("todos/{id}"),
        Some((Resource::Todo, id))
      )
      .await
  }

  #[instrument(skip(self, request), fields(title = %request.title))]
  async fn create_todo(
    &self,
    request: &CreateTodoRequest
  ) -> Result<Todo> {
    self
      .send_data(
        Method::POST,
        "todos",
        Some(request),
        None
      )
      .await
  }

  #[instrument(skip(self, request))]
  async fn update_todo(
    &self,
    id: i64,
    request: &UpdateTodoRequest
  ) -> Result<Todo> {
    self
      .send_data(
        Method::PUT,
        &format!("todos/{id}"),
        Some(request),
        Some((Resource::Todo, id))
      )
      .await
  }

  #[instrument(skip(self))]
  async fn delete_todo(
    &self,
    id: i64
  ) -> Result<()> {
    self
      .delete(
        &format!("todos/{id}"),
        (Resource::Todo, id)
      )
      .await
  }

  #[instrument(skip(self))]
  async fn toggle_complete(
    &self,
    id: i64
  ) -> Result<Todo> {
    self
      .send_data::<(), _>(
        Method::PATCH,
        &format!("todos/{id}/complete"),
        None,
        Some((Resource::Todo, id))
      )
      .await
  }

  #[instrument(skip(self))]
  async fn list_categories(
    &self
  ) -> Result<Vec<Category>> {
    self.get_data("categories", None).await
  }

  #[instrument(skip(self))]
  async fn get_category(
    &self,
    id: i64
  ) -> Result<Category> {
    self
      .get_data(
        &format!("categories/{id}"),
        Some((Resource::Category, id))
      )
      .await
  }

  #[instrument(skip(self, request), fields(name = %request.name))]
  async fn create_category(
    &self,
    request: &CreateCategoryRequest
  ) -> Result<Category> {
    self
      .send_data(
        Method::POST,
        "categories",
        Some(request),
        None
      )
      .await
  }

  #[instrument(skip(self, request))]
  async fn update_category(
    &self,
    id: i64,
    request: &UpdateCategoryRequest
  ) -> Result<Category> {
    self
      .send_data(
        Method::PUT,
        &format!("categories/{id}"),
        Some(request),
        Some((Resource::Category, id))
      )
      .await
  }

  #[instrument(skip(self))]
  async fn delete_category(
    &self,
    id: i64
  ) -> Result<()> {
    self
      .delete(
        &format!("categories/{id}"),
        (Resource::Category, id)
      )
      .await
  }
}

fn decode_data<T: DeserializeOwned>(
  body: &str
) -> Result<T> {
  let envelope: ApiResponse<T> =
    serde_json::from_str(body).map_err(
      |err| TallyError::decode(err.to_string())
    )?;
  envelope.data.ok_or_else(|| {
    TallyError::decode(
      "response envelope has no data"
    )
  })
}

/// Message precedence: envelope message,
/// then HTTP reason phrase, then a fixed
/// fallback.
fn error_from_response(
  status: StatusCode,
  body: &str,
  subject: Option<(Resource, i64)>
) -> TallyError {
  if status == StatusCode::NOT_FOUND
    && let Some((resource, id)) = subject
  {
    return TallyError::NotFound {
      resource,
      id
    };
  }

  let envelope_message = serde_json::from_str::<
    ApiResponse<serde_json::Value>
  >(body)
  .ok()
  .map(|envelope| envelope.message)
  .filter(|message| !message.trim().is_empty());

  let message = envelope_message
    .or_else(|| {
      status
        .canonical_reason()
        .map(str::to_string)
    })
    .unwrap_or_else(|| {
      FALLBACK_ERROR_MESSAGE.to_string()
    });

  TallyError::Api {
    code: status.as_u16(),
    message
  }
}
