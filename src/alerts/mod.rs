//! Alert model and text rendering
//!
//! Alerts are produced as structured values by the baseline engine and the
//! cycle tracker. Rendering to text is a separate step so the notification
//! wording can be swapped without touching the detection logic.

use crate::core::format::float_repr;
use crate::core::RatingUnit;
use serde::{Deserialize, Serialize};

/// Which check produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    PowerSigma,
    RuntimeSigma,
    Envelope,
    LongRunning,
}

/// A learned-baseline deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigmaBreach {
    pub channel: String,
    pub observed: f64,
    /// Sigma multiplier the deviation was tested against
    pub bound: f64,
    pub mean: f64,
    pub stdev: f64,
}

/// A nameplate envelope violation, expressed in rating units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeBreach {
    pub channel: String,
    pub observed: f64,
    pub low: f64,
    pub high: f64,
    pub unit: RatingUnit,
}

/// Something worth telling the operator about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Alert {
    PowerSigma(SigmaBreach),
    RuntimeSigma(SigmaBreach),
    Envelope(EnvelopeBreach),
    LongRunning { channel: String, elapsed_secs: f64 },
}

impl Alert {
    pub fn kind(&self) -> AlertKind {
        match self {
            Alert::PowerSigma(_) => AlertKind::PowerSigma,
            Alert::RuntimeSigma(_) => AlertKind::RuntimeSigma,
            Alert::Envelope(_) => AlertKind::Envelope,
            Alert::LongRunning { .. } => AlertKind::LongRunning,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Alert::PowerSigma(b) | Alert::RuntimeSigma(b) => &b.channel,
            Alert::Envelope(b) => &b.channel,
            Alert::LongRunning { channel, .. } => channel,
        }
    }
}

/// Turns alerts into notification text
pub trait AlertFormatter: Send {
    fn format(&self, alert: &Alert) -> String;

    /// Concatenate the rendering of every alert
    fn format_all(&self, alerts: &[Alert]) -> String {
        alerts.iter().map(|a| self.format(a)).collect()
    }
}

/// The established alert wording that downstream mail filters and
/// golden-output tests match on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyTextFormatter;

impl AlertFormatter for LegacyTextFormatter {
    fn format(&self, alert: &Alert) -> String {
        match alert {
            Alert::PowerSigma(b) => format!(
                "Power: {:.1} Exceeded {} stdev's of {:.1} from mean of {:.1} at initial calibration.\n",
                b.observed,
                float_repr(b.bound),
                b.stdev,
                b.mean
            ),
            Alert::RuntimeSigma(b) => format!(
                " Runtime: {:.1} Exceeded {} stdev's of {:.1} from mean of {:.1} at initial calibration.\n",
                b.observed,
                float_repr(b.bound),
                b.stdev,
                b.mean
            ),
            Alert::Envelope(b) => {
                let unit = b.unit.label();
                format!(
                    " {}: {:.3} Exceeded limits of {:.3} to {:.3} {}\n",
                    unit, b.observed, b.low, b.high, unit
                )
            }
            Alert::LongRunning { channel, .. } => format!("{} on time exceeded!", channel),
        }
    }
}
