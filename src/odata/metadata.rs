//! $metadata extraction
//!
//! Pulls entity types and function imports out of the metadata document with
//! a line-oriented scan. Extraction is best-effort: a document we cannot make
//! sense of yields an empty model carrying the raw text for diagnostics,
//! never an error.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub edm_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityType {
    pub name: String,
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionImport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataModel {
    pub entity_types: Vec<EntityType>,
    pub function_imports: Vec<FunctionImport>,
    /// Raw document, kept only when nothing could be extracted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl MetadataModel {
    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty() && self.function_imports.is_empty()
    }
}

/// Scan the metadata XML for EntityType and FunctionImport definitions.
pub fn extract(xml: &str) -> MetadataModel {
    let mut model = MetadataModel::default();
    let mut current: Option<EntityType> = None;

    for line in xml.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("<EntityType") {
            if let Some(name) = attr(trimmed, "Name") {
                current = Some(EntityType {
                    name: name.to_string(),
                    properties: Vec::new(),
                });
            }
        }

        if trimmed.contains("</EntityType>") {
            if let Some(entity) = current.take() {
                model.entity_types.push(entity);
            }
        }

        if trimmed.starts_with("<Property") {
            if let (Some(entity), Some(name)) = (current.as_mut(), attr(trimmed, "Name")) {
                entity.properties.push(Property {
                    name: name.to_string(),
                    edm_type: attr(trimmed, "Type").unwrap_or("Edm.String").to_string(),
                    // Absent means nullable per the EDM default.
                    nullable: attr(trimmed, "Nullable") != Some("false"),
                });
            }
        }

        if trimmed.starts_with("<FunctionImport") {
            if let Some(name) = attr(trimmed, "Name") {
                model.function_imports.push(FunctionImport {
                    name: name.to_string(),
                    return_type: attr(trimmed, "ReturnType").map(str::to_string),
                });
            }
        }
    }

    if model.is_empty() {
        model.raw = Some(xml.to_string());
    }

    model
}

/// Value of an XML attribute on a single-line tag.
fn attr<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!("{name}=\"");
    let start = line.find(&marker)? + marker.len();
    let end = line[start..].find('"')?;
    Some(&line[start..start + end])
}
