use crate::error::UpstreamError;
use serde::Deserialize;

/// Fixed values narrowing a search. Rendered into an `aspect_filter`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Constraints {
    pub make: Option<String>,
    pub model: Option<String>,
}

impl Constraints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn make(make: &str) -> Self {
        Self {
            make: Some(make.to_string()),
            model: None,
        }
    }

    pub fn make_model(make: &str, model: &str) -> Self {
        Self {
            make: Some(make.to_string()),
            model: Some(model.to_string()),
        }
    }

    pub fn aspect_filter(&self, category_id: &str) -> String {
        let mut filter = format!("categoryId:{category_id}");
        if let Some(make) = &self.make {
            filter.push_str(&format!(",Make:{{{}}}", sanitize(make)));
        }
        if let Some(model) = &self.model {
            filter.push_str(&format!(",Model:{{{}}}", sanitize(model)));
        }
        filter
    }
}

// braces and pipes are filter syntax
fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemAspect {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub structured_attributes: Vec<ItemAspect>,
}

impl RawItem {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            structured_attributes: Vec::new(),
        }
    }

    pub fn with_aspect(mut self, name: &str, value: &str) -> Self {
        self.structured_attributes.push(ItemAspect {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }
}

/// Marketplace-side histogram for one aspect. Counts may be zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectDistribution {
    pub name: String,
    pub values: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<RawItem>,
    pub total: u64,
    pub distributions: Vec<AspectDistribution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchBody {
    total: Option<u64>,
    #[serde(default)]
    item_summaries: Vec<ItemSummary>,
    #[serde(default)]
    refinement: Option<Refinement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    localized_aspects: Vec<ItemAspect>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Refinement {
    #[serde(default)]
    aspect_distributions: Vec<RawDistribution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDistribution {
    localized_aspect_name: String,
    #[serde(default)]
    aspect_value_distributions: Vec<RawValueDistribution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawValueDistribution {
    localized_aspect_value: String,
    #[serde(default)]
    match_count: u32,
}

impl SearchBody {
    pub(crate) fn into_page(self) -> Result<SearchPage, UpstreamError> {
        let total = self
            .total
            .ok_or_else(|| UpstreamError::InvalidShape("search response missing `total`".into()))?;
        let items = self
            .item_summaries
            .into_iter()
            .filter_map(|summary| {
                let title = summary.title.unwrap_or_default();
                if title.trim().is_empty() && summary.localized_aspects.is_empty() {
                    return None;
                }
                Some(RawItem {
                    title,
                    structured_attributes: summary.localized_aspects,
                })
            })
            .collect();
        let distributions = self
            .refinement
            .map(|r| r.aspect_distributions)
            .unwrap_or_default()
            .into_iter()
            .map(|d| AspectDistribution {
                name: d.localized_aspect_name,
                values: d
                    .aspect_value_distributions
                    .into_iter()
                    .map(|v| (v.localized_aspect_value, v.match_count))
                    .collect(),
            })
            .collect();
        Ok(SearchPage {
            items,
            total,
            distributions,
        })
    }
}
