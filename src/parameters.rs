use std::collections::HashMap;

use serde::{Serialize, Serializer};

/// Parameter key carrying a per-mbox property token. It is never sent as a regular mbox
/// parameter.
pub(crate) const AT_PROPERTY_KEY: &str = "at_property";

/// Order details attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOrder {
    /// Order id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Order total amount.
    pub total: f64,
    /// Ids of purchased products.
    ///
    /// The delivery API expects these as a single string holding a JSON array literal, so they
    /// serialize as `"[\"no1\",\"no2\"]"` rather than a native array.
    #[serde(
        serialize_with = "serialize_as_json_string",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub purchased_product_ids: Vec<String>,
}

impl TargetOrder {
    /// Create a new order.
    ///
    /// ```
    /// # use target_delivery::TargetOrder;
    /// let order = TargetOrder::new("order-1", 12.5, vec!["sku-1".to_owned()]);
    /// assert_eq!(order.total, 12.5);
    /// ```
    pub fn new(id: impl Into<String>, total: f64, purchased_product_ids: Vec<String>) -> Self {
        TargetOrder {
            id: id.into(),
            total,
            purchased_product_ids,
        }
    }
}

fn serialize_as_json_string<S: Serializer>(ids: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    let literal = serde_json::to_string(ids).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&literal)
}

/// Product details attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetProduct {
    /// Product id.
    pub id: String,
    /// Product category id.
    pub category_id: String,
}

impl TargetProduct {
    /// Create a new product.
    pub fn new(id: impl Into<String>, category_id: impl Into<String>) -> Self {
        TargetProduct {
            id: id.into(),
            category_id: category_id.into(),
        }
    }
}

/// Parameters sent along with an mbox request or a notification.
///
/// Each group (mbox parameters, profile parameters, order, product) is serialized only when it is
/// non-empty. Values are immutable once built; use the `with_*` methods to build them.
///
/// ```
/// # use std::collections::HashMap;
/// # use target_delivery::{TargetParameters, TargetProduct};
/// let parameters = TargetParameters::new()
///     .with_parameters(HashMap::from([("color".to_owned(), "red".to_owned())]))
///     .with_product(TargetProduct::new("pid", "cid"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetParameters {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    profile_parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order: Option<TargetOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<TargetProduct>,
}

impl TargetParameters {
    /// Create empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set mbox parameters.
    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set profile parameters.
    pub fn with_profile_parameters(mut self, profile_parameters: HashMap<String, String>) -> Self {
        self.profile_parameters = profile_parameters;
        self
    }

    /// Set order details.
    pub fn with_order(mut self, order: TargetOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Set product details.
    pub fn with_product(mut self, product: TargetProduct) -> Self {
        self.product = Some(product);
        self
    }

    /// Mbox parameters.
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// Profile parameters.
    pub fn profile_parameters(&self) -> &HashMap<String, String> {
        &self.profile_parameters
    }

    /// Order details, if any.
    pub fn order(&self) -> Option<&TargetOrder> {
        self.order.as_ref()
    }

    /// Product details, if any.
    pub fn product(&self) -> Option<&TargetProduct> {
        self.product.as_ref()
    }

    /// Returns `true` if no group is set.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
            && self.profile_parameters.is_empty()
            && self.order.is_none()
            && self.product.is_none()
    }

    /// Merge global parameters with per-request parameters.
    ///
    /// Merging is done per group, never per key: a non-empty per-request group replaces the
    /// global group as a whole. Empty or missing per-request groups fall back to the global
    /// ones. No validation is performed, so `{"": ""}` passes through as-is.
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use target_delivery::TargetParameters;
    /// let global = TargetParameters::new()
    ///     .with_parameters(HashMap::from([("a".to_owned(), "1".to_owned())]));
    /// let request = TargetParameters::new().with_parameters(HashMap::from([
    ///     ("a".to_owned(), "2".to_owned()),
    ///     ("b".to_owned(), "3".to_owned()),
    /// ]));
    ///
    /// let merged = TargetParameters::merge(Some(&global), Some(&request));
    /// assert_eq!(merged.parameters(), request.parameters());
    /// ```
    pub fn merge(
        global: Option<&TargetParameters>,
        per_request: Option<&TargetParameters>,
    ) -> TargetParameters {
        let empty = TargetParameters::default();
        let global = global.unwrap_or(&empty);
        let per_request = per_request.unwrap_or(&empty);

        fn pick<'a>(
            global: &'a HashMap<String, String>,
            per_request: &'a HashMap<String, String>,
        ) -> HashMap<String, String> {
            if per_request.is_empty() {
                global.clone()
            } else {
                per_request.clone()
            }
        }

        TargetParameters {
            parameters: pick(&global.parameters, &per_request.parameters),
            profile_parameters: pick(&global.profile_parameters, &per_request.profile_parameters),
            order: per_request.order.clone().or_else(|| global.order.clone()),
            product: per_request.product.clone().or_else(|| global.product.clone()),
        }
    }

    /// Attach externally supplied profile parameters. Keys already present are kept.
    pub(crate) fn with_default_profile_parameters<'a>(
        mut self,
        defaults: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        for (key, value) in defaults {
            self.profile_parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Remove the per-mbox property token from mbox parameters, returning it if non-empty.
    pub(crate) fn take_property_token(&mut self) -> Option<String> {
        self.parameters
            .remove(AT_PROPERTY_KEY)
            .filter(|token| !token.is_empty())
    }
}
