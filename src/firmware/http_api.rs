use embedded_svc::http::Headers;
use esp_idf_svc::http::server::{EspHttpConnection, EspHttpServer, Method, Request};
use esp_idf_svc::io::{Read, Write};
use ossm_stroke::command::ControlRequest;
use ossm_stroke::engine::{SharedEngine, StrokeEngine};
use ossm_stroke::pattern::PatternKind;
use ossm_stroke::settings::EngineConfig;
use serde::Serialize;

use super::context::AppContext;

const MAX_BODY_LEN: usize = 1024;
const CORS: (&str, &str) = ("Access-Control-Allow-Origin", "*");

#[derive(Serialize)]
struct PatternEntry {
    index: usize,
    key: PatternKind,
    name: &'static str,
}

type HttpRequest<'r, 'c> = Request<&'r mut EspHttpConnection<'c>>;

fn respond(req: HttpRequest, status: u16, body: &str) -> anyhow::Result<()> {
    let headers = [CORS, ("Content-Type", "application/json")];
    req.into_response(status, None, &headers)?
        .write_all(body.as_bytes())?;
    Ok(())
}

fn read_body(req: &mut HttpRequest) -> anyhow::Result<Option<Vec<u8>>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_BODY_LEN {
        return Ok(None);
    }
    let mut buf = vec![0; len];
    req.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// Runs `f` on the engine, or answers 503 while there is none.
fn with_engine(
    engine: &SharedEngine,
    req: HttpRequest,
    f: impl FnOnce(&mut StrokeEngine) -> anyhow::Result<String>,
) -> anyhow::Result<()> {
    let mut engine = engine.lock().unwrap();
    match engine.as_mut() {
        Some(engine) => match f(&mut **engine) {
            Ok(json) => respond(req, 200, &json),
            Err(e) => {
                log::error!("Request failed: {}", e);
                respond(req, 400, &serde_json::json!({ "error": e.to_string() }).to_string())
            }
        },
        None => respond(req, 503, r#"{"error":"Stroke engine not initialized"}"#),
    }
}

pub fn register_handlers(server: &mut EspHttpServer, app_context: AppContext) -> anyhow::Result<()> {
    // CORS preflight
    for (uri, methods) in [
        ("/config", "GET, POST, OPTIONS"),
        ("/control", "POST, OPTIONS"),
        ("/state", "GET, OPTIONS"),
        ("/patterns", "GET, OPTIONS"),
    ] {
        server.fn_handler::<anyhow::Error, _>(uri, Method::Options, move |req| {
            req.into_response(
                200,
                Some("OK"),
                &[
                    CORS,
                    ("Access-Control-Allow-Methods", methods),
                    ("Access-Control-Allow-Headers", "*"),
                ],
            )?
            .write_all(&[])?;
            Ok(())
        })?;
    }

    {
        let engine = app_context.engine.clone();
        server.fn_handler::<anyhow::Error, _>("/config", Method::Get, move |req| {
            with_engine(&engine, req, |engine| {
                Ok(serde_json::to_string(&engine.get_config())?)
            })
        })?;
    }

    {
        let engine = app_context.engine.clone();
        server.fn_handler::<anyhow::Error, _>("/config", Method::Post, move |mut req| {
            let Some(body) = read_body(&mut req)? else {
                return respond(req, 413, r#"{"error":"Request too big"}"#);
            };
            let config = match serde_json::from_slice::<EngineConfig>(&body) {
                Ok(config) => config,
                Err(e) => {
                    log::error!("Failed to parse config: {}", e);
                    return respond(req, 400, r#"{"error":"Bad Request"}"#);
                }
            };
            with_engine(&engine, req, move |engine| {
                engine.set_config(config)?;
                Ok(serde_json::to_string(&engine.get_config())?)
            })
        })?;
    }

    {
        let engine = app_context.engine.clone();
        server.fn_handler::<anyhow::Error, _>("/control", Method::Post, move |mut req| {
            let Some(body) = read_body(&mut req)? else {
                return respond(req, 413, r#"{"error":"Request too big"}"#);
            };
            let control = match serde_json::from_slice::<ControlRequest>(&body) {
                Ok(control) => control,
                Err(e) => {
                    log::error!("Failed to parse control request: {}", e);
                    return respond(req, 400, r#"{"error":"Bad Request"}"#);
                }
            };
            with_engine(&engine, req, move |engine| {
                control.apply(engine)?;
                Ok(serde_json::to_string(&engine.get_current_state())?)
            })
        })?;
    }

    {
        let engine = app_context.engine.clone();
        server.fn_handler::<anyhow::Error, _>("/state", Method::Get, move |req| {
            with_engine(&engine, req, |engine| {
                Ok(serde_json::to_string(&engine.get_current_state())?)
            })
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/patterns", Method::Get, |req| {
        let patterns: Vec<PatternEntry> = PatternKind::ALL
            .iter()
            .enumerate()
            .map(|(index, kind)| PatternEntry {
                index,
                key: *kind,
                name: kind.name(),
            })
            .collect();
        respond(req, 200, &serde_json::to_string(&patterns)?)
    })?;

    Ok(())
}
