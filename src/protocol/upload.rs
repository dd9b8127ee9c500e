use crate::error::SessionError;

/// Collects `upload:<fragment>` chunks between `START` and `DONE`.
#[derive(Debug, Default)]
pub struct UploadReassembler {
    chunks: Vec<String>,
}

/// A completed upload: `filename:mimeType:base64Data`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub filename: String,
    pub mime_type: String,
    /// Base64-encoded file contents
    pub data: String,
}

impl UploadedImage {
    /// `data:<mime>;base64,<data>` form expected by vision services
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

impl UploadReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: String) {
        self.chunks.push(fragment);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate all fragments and split into the upload tuple. The data
    /// part is passed on as sent; the vision service decodes it.
    pub fn finish(self) -> Result<UploadedImage, SessionError> {
        let payload = self.chunks.concat();
        let mut parts = payload.splitn(3, ':');

        let (Some(filename), Some(mime_type), Some(data)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::UploadProtocol(format!(
                "expected filename:mimeType:data, got {} bytes without two separators",
                payload.len()
            )));
        };

        if filename.is_empty() {
            return Err(SessionError::UploadProtocol("empty filename".to_string()));
        }

        Ok(UploadedImage {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}
