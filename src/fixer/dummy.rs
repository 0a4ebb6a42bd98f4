use crate::cancel::CancelToken;
use crate::fixer::{
    FixDefinitionRequest, FixDefinitionResponse, FixReferenceOriginsRequest,
    FixReferenceOriginsResponse, Fixer, FixerError,
};

pub const DEFAULT_SUFFIX: &str = "-updated";

/// In-process fixer with a fixed, visible rewrite.
///
/// Every origin `expr` becomes the template `"${expr}<suffix>"`. When an
/// attribute line is configured, it is appended to every definition just
/// before the closing brace; otherwise definitions are returned unchanged.
#[derive(Debug, Clone)]
pub struct DummyFixer {
    suffix: String,
    attribute: Option<String>,
}

impl Default for DummyFixer {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_string(),
            attribute: None,
        }
    }
}

impl DummyFixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    fn rewrite_origin(&self, raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(raw.len() + self.suffix.len() + 5);
        out.extend_from_slice(b"\"${");
        out.extend_from_slice(raw);
        out.push(b'}');
        out.extend_from_slice(self.suffix.as_bytes());
        out.push(b'"');
        out
    }

    fn insert_attribute(&self, raw: &[u8], attribute: &str) -> Result<Vec<u8>, FixerError> {
        let close = raw
            .iter()
            .rposition(|&c| c == b'}')
            .ok_or_else(|| FixerError::Protocol("definition has no closing brace".to_string()))?;

        let head = &raw[..close];
        let trimmed_len = head
            .iter()
            .rposition(|&c| c != b' ' && c != b'\t')
            .map_or(0, |i| i + 1);
        let head = &head[..trimmed_len];

        let mut out = Vec::with_capacity(raw.len() + attribute.len() + 4);
        out.extend_from_slice(head);
        if !head.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.extend_from_slice(b"  ");
        out.extend_from_slice(attribute.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&raw[close..]);
        Ok(out)
    }
}

impl Fixer for DummyFixer {
    fn fix_reference_origins(
        &self,
        cancel: &CancelToken,
        req: &FixReferenceOriginsRequest,
    ) -> Result<FixReferenceOriginsResponse, FixerError> {
        if cancel.is_cancelled() {
            return Err(FixerError::Cancelled);
        }
        Ok(FixReferenceOriginsResponse {
            raw_contents: req
                .raw_contents
                .iter()
                .map(|raw| self.rewrite_origin(raw))
                .collect(),
        })
    }

    fn fix_definition(
        &self,
        cancel: &CancelToken,
        req: &FixDefinitionRequest,
    ) -> Result<FixDefinitionResponse, FixerError> {
        if cancel.is_cancelled() {
            return Err(FixerError::Cancelled);
        }
        let raw_content = match &self.attribute {
            Some(attribute) => self.insert_attribute(&req.raw_content, attribute)?,
            None => req.raw_content.clone(),
        };
        Ok(FixDefinitionResponse { raw_content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BlockType;

    fn definition(raw: &str) -> FixDefinitionRequest {
        FixDefinitionRequest {
            block_type: BlockType::Resource,
            block_name: "widget".to_string(),
            version: 0,
            raw_content: raw.as_bytes().to_vec(),
            raw_state: None,
        }
    }

    fn fix(fixer: &DummyFixer, raw: &str) -> String {
        let resp = fixer
            .fix_definition(&CancelToken::new(), &definition(raw))
            .unwrap();
        String::from_utf8(resp.raw_content).unwrap()
    }

    #[test]
    fn test_origin_rewrite() {
        let req = FixReferenceOriginsRequest {
            block_type: BlockType::Resource,
            block_name: "widget".to_string(),
            version: 0,
            raw_contents: vec![b"widget.x.id".to_vec(), b"widget.z.name".to_vec()],
        };
        let resp = DummyFixer::new()
            .fix_reference_origins(&CancelToken::new(), &req)
            .unwrap();
        assert_eq!(
            resp.raw_contents,
            vec![
                b"\"${widget.x.id}-updated\"".to_vec(),
                b"\"${widget.z.name}-updated\"".to_vec()
            ]
        );
    }

    #[test]
    fn test_custom_suffix() {
        let req = FixReferenceOriginsRequest {
            block_type: BlockType::DataSource,
            block_name: "widget".to_string(),
            version: 2,
            raw_contents: vec![b"data.widget.d.id".to_vec()],
        };
        let resp = DummyFixer::new()
            .with_suffix("-v2")
            .fix_reference_origins(&CancelToken::new(), &req)
            .unwrap();
        assert_eq!(resp.raw_contents[0], b"\"${data.widget.d.id}-v2\"".to_vec());
    }

    #[test]
    fn test_definition_unchanged_without_attribute() {
        assert_eq!(fix(&DummyFixer::new(), "widget \"x\" {}"), "widget \"x\" {}");
    }

    #[test]
    fn test_definition_attribute_inserted() {
        let fixer = DummyFixer::new().with_attribute("fixed = true");
        assert_eq!(fix(&fixer, "widget \"x\" {}"), "widget \"x\" {\n  fixed = true\n}");
        assert_eq!(
            fix(&fixer, "widget \"y\" {\n  id = 1\n}"),
            "widget \"y\" {\n  id = 1\n  fixed = true\n}"
        );
        assert_eq!(
            fix(&fixer, "widget \"y\" { id = 1 }"),
            "widget \"y\" { id = 1\n  fixed = true\n}"
        );
    }

    #[test]
    fn test_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = DummyFixer::new()
            .fix_definition(&cancel, &definition("widget \"x\" {}"))
            .unwrap_err();
        assert!(matches!(err, FixerError::Cancelled));
    }
}
