//! Typed model of the board's rendering contract

use serde::{Deserialize, Serialize};

/// A drawing command the board surface can apply
///
/// The wire shape matches the channel's command envelope: the variant name
/// under `cmd`, the fields under `args`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "args")]
pub enum BoardCommand {
    /// Draw a circle centered at `(x, y)`
    #[serde(rename = "drawCircle")]
    DrawCircle {
        x: f64,
        y: f64,
        radius: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },

    /// Write text at `(x, y)`
    #[serde(rename = "writeText")]
    WriteText {
        x: f64,
        y: f64,
        text: String,
        #[serde(rename = "fontSize", skip_serializing_if = "Option::is_none")]
        font_size: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },

    /// Erase everything
    #[serde(rename = "clearCanvas")]
    ClearCanvas {},
}

impl BoardCommand {
    /// The wire name of this command
    pub fn name(&self) -> &'static str {
        match self {
            BoardCommand::DrawCircle { .. } => "drawCircle",
            BoardCommand::WriteText { .. } => "writeText",
            BoardCommand::ClearCanvas {} => "clearCanvas",
        }
    }
}
