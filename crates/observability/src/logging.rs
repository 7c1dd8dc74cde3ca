//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `LANCHAT_LOG_LEVEL`: Filter-Direktive (z.B. `debug` oder
//!   `lanchat_relay=trace,info`), ueberschreibt die Konfiguration
//! - `LANCHAT_LOG_FORMAT`: Format (text/json), ueberschreibt die Konfiguration

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Filter
pub const LOG_LEVEL_ENV: &str = "LANCHAT_LOG_LEVEL";

/// Umgebungsvariable fuer das Log-Format
pub const LOG_FORMAT_ENV: &str = "LANCHAT_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen haben Vorrang vor `level` / `format`. Ein ungueltiger
/// Filter faellt auf `info` zurueck. Ein zweiter Aufruf ist wirkungslos.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = log_format_aufloesen(format);

    // try_init: Tests und eingebettete Nutzung duerfen bereits einen
    // globalen Subscriber gesetzt haben
    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging bereits initialisiert");
    }
}

/// Bestimmt das Log-Format: Umgebung vor Konfiguration, sonst `text`
pub fn log_format_aufloesen(konfiguriert: &str) -> String {
    let kandidat = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| konfiguriert.to_string());
    if log_format_gueltig(&kandidat) {
        kandidat
    } else {
        "text".to_string()
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_gueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level), "{level} muss gueltig sein");
        }
    }

    #[test]
    fn log_level_ungueltige_werte() {
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn log_format_werte() {
        assert!(log_format_gueltig("text"));
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("xml"));
        assert!(!log_format_gueltig("JSON"));
    }

    // Ein einziger Test fasst die Umgebungsvariable an, damit parallele
    // Tests sich nicht gegenseitig stoeren
    #[test]
    fn log_format_aufloesung() {
        std::env::remove_var(LOG_FORMAT_ENV);
        assert_eq!(log_format_aufloesen("json"), "json");
        assert_eq!(log_format_aufloesen("xml"), "text");

        std::env::set_var(LOG_FORMAT_ENV, "json");
        assert_eq!(log_format_aufloesen("text"), "json");
        std::env::remove_var(LOG_FORMAT_ENV);
    }

    #[test]
    fn doppelte_initialisierung_panikt_nicht() {
        logging_initialisieren("info", "text");
        logging_initialisieren("debug", "json");
    }
}
