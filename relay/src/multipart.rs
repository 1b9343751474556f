use bytes::Bytes;
use reqwest::multipart::{Form, Part};

#[derive(Clone, Debug, PartialEq)]
pub enum PartBody {
    Text(String),
    File {
        bytes: Bytes,
        filename: String,
        mime_type: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MultipartPart {
    pub name: String,
    pub body: PartBody,
}

/// Order-preserving multipart body. Parts are emitted in the order they were
/// added.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultipartRequest {
    parts: Vec<MultipartPart>,
}

impl MultipartRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            body: PartBody::Text(value.into()),
        });
        self
    }

    pub fn add_fields<I, K, V>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        fields
            .into_iter()
            .fold(self, |req, (name, value)| req.add_field(name, value))
    }

    pub fn add_file(
        mut self,
        name: impl Into<String>,
        bytes: Bytes,
        filename: impl Into<String>,
        mime_type: Option<String>,
    ) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            body: PartBody::File {
                bytes,
                filename: filename.into(),
                mime_type,
            },
        });
        self
    }

    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match &part.body {
            PartBody::Text(value) if part.name == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Total size of file parts in bytes.
    pub fn file_bytes(&self) -> u64 {
        self.parts
            .iter()
            .map(|part| match &part.body {
                PartBody::File { bytes, .. } => bytes.len() as u64,
                PartBody::Text(_) => 0,
            })
            .sum()
    }

    pub fn into_form(self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for part in self.parts {
            form = match part.body {
                PartBody::Text(value) => form.text(part.name, value),
                PartBody::File {
                    bytes,
                    filename,
                    mime_type,
                } => {
                    let mut file = Part::bytes(bytes.to_vec()).file_name(filename);
                    if let Some(mime) = mime_type {
                        file = file.mime_str(&mime)?;
                    }
                    form.part(part.name, file)
                }
            };
        }
        Ok(form)
    }
}
