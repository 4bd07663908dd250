//! System preamble and tool schema carried on every streaming request

use serde_json::{json, Value};

/// Default system preamble for the tutor
pub const SYSTEM_PREAMBLE: &str = r#"You are Chalktalk, a friendly and patient programming tutor. Your goal is to help students learn programming clearly and comprehensibly. Respond conversationally, as if you were speaking directly with the student. Keep your answers concise but informative. If you do not understand something, ask for clarification kindly.

IMPORTANT: You have access to drawing tools for creating diagrams and visual explanations on a shared board:
- writeText: write text on the board
- drawCircle: draw circles (useful for flow diagrams, nodes, and so on)
- clearCanvas: wipe the board

Use these tools whenever a diagram would help. For example:
- To explain a loop, draw a flow diagram
- To show a data structure, draw connected nodes"#;

/// Fixed tool schema describing the board drawing commands
///
/// The shape follows the function-calling convention of OpenAI-compatible
/// chat completion APIs.
pub fn tool_schema() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": "writeText",
                "description": "Write text on the board at a specific coordinate.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string", "description": "The text to write." },
                        "x": { "type": "number", "description": "X coordinate." },
                        "y": { "type": "number", "description": "Y coordinate." },
                        "fontSize": { "type": "number", "description": "Font size, e.g. 24." }
                    },
                    "required": ["text", "x", "y"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "drawCircle",
                "description": "Draw a circle on the board.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "x": { "type": "number", "description": "X coordinate of the center." },
                        "y": { "type": "number", "description": "Y coordinate of the center." },
                        "radius": { "type": "number", "description": "Radius of the circle." },
                        "color": { "type": "string", "description": "Stroke color, e.g. '#FFFFFF'." }
                    },
                    "required": ["x", "y", "radius"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "clearCanvas",
                "description": "Erase everything on the board.",
                "parameters": { "type": "object", "properties": {} }
            }
        }
    ])
}
