//! Content parts shared by messages and artifacts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A discriminated union representing one piece of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    /// Plain text.
    Text(TextPart),
    /// A file, inline or by reference.
    File(FilePart),
    /// Structured JSON data.
    Data(DataPart),
}

impl Part {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextPart {
            text: text.into(),
            metadata: None,
        })
    }

    /// Creates a file part pointing at a URI.
    pub fn file_uri(uri: impl Into<String>, mime_type: Option<String>) -> Self {
        Self::File(FilePart {
            file: FileContent::Uri {
                uri: uri.into(),
                mime_type,
                name: None,
            },
            metadata: None,
        })
    }

    /// Creates a data part.
    pub fn data(data: HashMap<String, serde_json::Value>) -> Self {
        Self::Data(DataPart {
            data,
            metadata: None,
        })
    }

    /// Returns the text content if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(p) => Some(&p.text),
            _ => None,
        }
    }
}

/// A text segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPart {
    /// The string content.
    pub text: String,
    /// Optional metadata associated with this part.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// A file segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilePart {
    /// The file content.
    pub file: FileContent,
    /// Optional metadata associated with this part.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// File content, either inline base64 bytes or a URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileContent {
    /// Inline, base64-encoded.
    Bytes {
        /// The base64-encoded content.
        bytes: String,
        /// The MIME type of the file.
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// An optional file name.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Located at a URI.
    Uri {
        /// Where the content lives.
        uri: String,
        /// The MIME type of the file.
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// An optional file name.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// A structured data segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPart {
    /// The JSON payload.
    pub data: HashMap<String, serde_json::Value>,
    /// Optional metadata associated with this part.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}
