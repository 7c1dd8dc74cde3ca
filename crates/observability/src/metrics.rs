//! Prometheus-kompatible Metriken fuer das Relay
//!
//! Registrierte Metriken:
//! - `lanchat_active_sessions` – Gauge: Aktive (registrierte) Sitzungen
//! - `lanchat_connections_total` – Counter: Akzeptierte TCP-Verbindungen
//! - `lanchat_messages_submitted_total` – Counter: Beim Hub eingereichte Nachrichten
//! - `lanchat_deliveries_total` – Counter: Erfolgreich eingereihte Zustellungen
//! - `lanchat_delivery_failures_total` – Counter: Fehlgeschlagene Zustellungen
//! - `lanchat_protocol_violations_total` – Counter: Protokollverletzungen

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Relay-Metriken
///
/// Clone teilt Registry und Zaehler.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    pub active_sessions: IntGauge,
    pub connections_total: IntCounter,
    pub messages_submitted_total: IntCounter,
    pub deliveries_total: IntCounter,
    pub delivery_failures_total: IntCounter,
    pub protocol_violations_total: IntCounter,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let active_sessions = IntGauge::with_opts(Opts::new(
            "lanchat_active_sessions",
            "Anzahl aktuell registrierter Sitzungen",
        ))?;
        registry.register(Box::new(active_sessions.clone()))?;

        let connections_total = zaehler(
            &registry,
            "lanchat_connections_total",
            "Gesamtanzahl akzeptierter TCP-Verbindungen",
        )?;
        let messages_submitted_total = zaehler(
            &registry,
            "lanchat_messages_submitted_total",
            "Gesamtanzahl beim Hub eingereichter Nachrichten",
        )?;
        let deliveries_total = zaehler(
            &registry,
            "lanchat_deliveries_total",
            "Gesamtanzahl eingereihter Zustellungen an Sitzungen",
        )?;
        let delivery_failures_total = zaehler(
            &registry,
            "lanchat_delivery_failures_total",
            "Gesamtanzahl fehlgeschlagener Zustellungen (langsamer oder getrennter Peer)",
        )?;
        let protocol_violations_total = zaehler(
            &registry,
            "lanchat_protocol_violations_total",
            "Gesamtanzahl wegen Protokollverletzung geschlossener Verbindungen",
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            active_sessions,
            connections_total,
            messages_submitted_total,
            deliveries_total,
            delivery_failures_total,
            protocol_violations_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
