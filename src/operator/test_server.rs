//! In-process API server backing a real `K8s` client in tests. Every request
//! is recorded; objects are served from an in-memory map keyed by URL path.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Response};
use kube::Client;
use serde_json::{json, Value};
use tower::service_fn;

use super::K8s;

pub const SECRETS: &str = "/api/v1/namespaces/n/secrets";
pub const API_SERVICES: &str = "/apis/apiregistration.k8s.io/v1/apiservices";
pub const VALIDATING: &str =
    "/apis/admissionregistration.k8s.io/v1/validatingwebhookconfigurations";
pub const MUTATING: &str = "/apis/admissionregistration.k8s.io/v1/mutatingwebhookconfigurations";

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub content_type: String,
    pub body: Value,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Value>,
    failures: BTreeMap<(String, String), u16>,
    requests: Vec<Recorded>,
}

#[derive(Clone, Default)]
pub struct ApiServer {
    state: Arc<Mutex<State>>,
}

impl ApiServer {
    pub fn with_object(self, path: String, object: Value) -> Self {
        self.state.lock().unwrap().objects.insert(path, object);
        self
    }

    /// Answers `method` on `path` with an API error of status `code`.
    pub fn failing(self, method: &str, path: String, code: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((method.to_string(), path), code);
        self
    }

    pub fn k8s(&self) -> K8s {
        let state = self.state.clone();
        let service = service_fn(move |request: Request<Body>| {
            let state = state.clone();
            async move { Ok::<_, Infallible>(handle(state, request).await) }
        });
        K8s::new(Client::new(service, "default"))
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    /// `METHOD path` of every request, in arrival order.
    pub fn log(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }
}

pub fn secret(name: &str, data: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name, "namespace": "n" },
        "type": "Opaque",
        "data": data,
    })
}

pub fn webhook_configuration(kind: &str, name: &str, entries: &[&str]) -> Value {
    let webhooks: Vec<Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "name": entry,
                "admissionReviewVersions": ["v1"],
                "sideEffects": "None",
                "failurePolicy": "Ignore",
                "clientConfig": { "caBundle": "c3RhbGU=" },
            })
        })
        .collect();
    json!({
        "apiVersion": "admissionregistration.k8s.io/v1",
        "kind": kind,
        "metadata": { "name": name },
        "webhooks": webhooks,
    })
}

pub fn api_service(name: &str) -> Value {
    json!({
        "apiVersion": "apiregistration.k8s.io/v1",
        "kind": "APIService",
        "metadata": { "name": name },
        "spec": {
            "group": "metrics.k8s.io",
            "version": "v1beta1",
            "groupPriorityMinimum": 100,
            "versionPriority": 100,
            "insecureSkipTLSVerify": true,
        },
    })
}

async fn handle(state: Arc<Mutex<State>>, request: Request<Body>) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let bytes = hyper::body::to_bytes(body).await.unwrap_or_default();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();

    let mut state = state.lock().unwrap();
    state.requests.push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query: parts.uri.query().unwrap_or_default().to_string(),
        content_type: parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        body: body.clone(),
    });

    if let Some(code) = state.failures.get(&(method.clone(), path.clone())) {
        return status(*code);
    }

    match method.as_str() {
        "POST" => {
            let name = body["metadata"]["name"].as_str().unwrap_or_default();
            let key = format!("{path}/{name}");
            if state.objects.contains_key(&key) {
                return status(409);
            }
            state.objects.insert(key, body.clone());
            respond(201, body)
        }
        "PUT" => match state.objects.get_mut(&path) {
            Some(object) => {
                *object = body.clone();
                respond(200, body)
            }
            None => status(404),
        },
        "GET" | "PATCH" => match state.objects.get(&path) {
            Some(object) => respond(200, object.clone()),
            None => status(404),
        },
        _ => status(405),
    }
}

fn status(code: u16) -> Response<Body> {
    let reason = match code {
        404 => "NotFound",
        409 => "AlreadyExists",
        _ => "InternalError",
    };
    respond(
        code,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code,
        }),
    )
}

fn respond(code: u16, body: Value) -> Response<Body> {
    Response::builder()
        .status(code)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
