use serde_json::{json, Map, Value};
use std::path::Path;

use crate::controller::PageData;

/// Names derived from a page template's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageName {
    /// Output file name: the template file name minus one trailing template suffix.
    pub out_file: String,
    /// `out_file` without its last extension; keys the controller and `pagename`.
    pub logical_name: String,
}

impl PageName {
    /// `page.html.j2` with suffix `j2` gives `page.html` / `page`.
    /// Names without the suffix are kept whole.
    pub fn parse(file_name: &str, template_suffix: &str) -> Self {
        let out_file = file_name
            .strip_suffix(template_suffix)
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(file_name)
            .to_string();
        let logical_name = Path::new(&out_file)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&out_file)
            .to_string();
        Self {
            out_file,
            logical_name,
        }
    }

    /// The injected `pagename` value: `{ name, is: { <name>: true } }`.
    pub fn descriptor(&self) -> Value {
        let mut is = Map::new();
        is.insert(self.logical_name.clone(), Value::Bool(true));
        json!({
            "name": self.logical_name,
            "is": is,
        })
    }
}

/// Builds a page's template parameters.
///
/// Later sources win: `pagename` descriptor, then `params`, then page data.
pub fn parameter_bag(
    page: &PageName,
    params: &Map<String, Value>,
    page_data: Option<PageData>,
) -> Map<String, Value> {
    let mut bag = Map::new();
    bag.insert("pagename".to_string(), page.descriptor());
    bag.extend(params.clone());
    if let Some(data) = page_data {
        bag.extend(data);
    }
    bag
}
