//! Binds a feed to an HTTP request: single object, one-shot list, or event stream
use crate::{
    error::ApiError,
    routes::{AppState, Resolve},
    stream::{updates, DEBOUNCE},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use mirror_runtime::{Feed, Filter, Projection, View};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::convert::Infallible;

/// Query parameters shared by every resource endpoint
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Respond with a single JSON document instead of a stream
    #[serde(deserialize_with = "flag")]
    pub once: bool,
    /// Serve full objects instead of list-view projections
    #[serde(deserialize_with = "flag")]
    pub dense: bool,
    /// Exact namespace
    pub namespace: Option<String>,
    /// Case-sensitive name substring
    pub name: Option<String>,
    /// Comma-separated field paths to keep
    pub fields: Option<String>,
}

/// `1`, `t` and `true` in any case are true; anything else is false
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(matches!(raw.to_ascii_lowercase().as_str(), "1" | "t" | "true"))
}

impl Params {
    fn has_filter(&self) -> bool {
        let set = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.namespace) || set(&self.name)
    }

    fn render(&self) -> Render {
        let fields = self
            .fields
            .as_deref()
            .map(Projection::parse)
            .filter(|p| !p.is_empty());
        Render {
            filter: Filter::new(self.namespace.as_deref(), self.name.as_deref()),
            // projected fields may not be in the sparse view
            view: if self.dense || fields.is_some() {
                View::Dense
            } else {
                View::Sparse
            },
            fields,
        }
    }
}

/// Everything needed to turn a feed into a response body, parsed once per request
#[derive(Clone, Debug)]
pub(crate) struct Render {
    filter: Filter,
    view: View,
    fields: Option<Projection>,
}

impl Render {
    fn project(&self, doc: Value) -> Value {
        match &self.fields {
            Some(fields) => fields.apply(&doc),
            None => doc,
        }
    }

    pub(crate) fn list(&self, feed: &dyn Feed) -> Value {
        if !feed.available() {
            return crd_not_found();
        }
        feed.list(&self.filter, self.view)
            .into_iter()
            .map(|doc| self.project(doc))
            .collect()
    }

    /// The first document of the feed, for feeds that serve exactly one
    pub(crate) fn first(&self, feed: &dyn Feed) -> Value {
        feed.list(&self.filter, self.view)
            .into_iter()
            .next()
            .map_or(Value::Null, |doc| self.project(doc))
    }
}

pub(crate) fn crd_not_found() -> Value {
    json!({ "error": "crd not found" })
}

/// A JSON body with the headers every non-streaming response carries
pub(crate) fn json_response(status: StatusCode, body: &Value) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/json; charset=utf-8")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        body.to_string(),
    )
        .into_response()
}

/// Frame every document of `stream` as an SSE `data:` event
pub(crate) fn sse(
    stream: impl futures::Stream<Item = Value> + Send + 'static,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    Sse::new(stream.map(|doc| Ok(Event::default().data(doc.to_string())))).keep_alive(KeepAlive::default())
}

/// `GET <kind>/{uid}`
pub async fn single(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(params): Query<Params>,
    resolve: Resolve,
) -> Result<Response, ApiError> {
    if params.has_filter() {
        return Err(ApiError::UidWithFilter);
    }
    let feed = resolve(&state.session.cache());
    if !feed.available() {
        return Ok(json_response(StatusCode::OK, &crd_not_found()));
    }
    let doc = feed.get(&uid).ok_or(ApiError::NotFound(uid))?;
    Ok(json_response(StatusCode::OK, &params.render().project(doc)))
}

/// `GET <kind>`: a one-shot list with `once=true`, otherwise a debounced stream
pub async fn list(State(state): State<AppState>, Query(params): Query<Params>, resolve: Resolve) -> Response {
    let render = params.render();
    if params.once {
        let feed = resolve(&state.session.cache());
        return json_response(StatusCode::OK, &render.list(feed.as_ref()));
    }
    let stream = updates(
        state.session,
        resolve,
        move |feed| render.list(feed),
        DEBOUNCE,
        state.shutdown,
    );
    sse(stream).into_response()
}

/// `GET` of a feed that serves a single computed document
pub async fn object(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    resolve: Resolve,
) -> Response {
    let render = params.render();
    if params.once {
        let feed = resolve(&state.session.cache());
        return json_response(StatusCode::OK, &render.first(feed.as_ref()));
    }
    let stream = updates(
        state.session,
        resolve,
        move |feed| render.first(feed),
        DEBOUNCE,
        state.shutdown,
    );
    sse(stream).into_response()
}
