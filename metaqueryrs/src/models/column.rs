//! Columns and their per-type options.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::formula::{parse_formula, FormulaAst};

/// UI data type of a column, independent of its physical SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Uidt {
    ID,
    ForeignKey,
    SingleLineText,
    LongText,
    Email,
    URL,
    PhoneNumber,
    Number,
    Decimal,
    Currency,
    Percent,
    Rating,
    Duration,
    Year,
    AutoNumber,
    Checkbox,
    SingleSelect,
    MultiSelect,
    Date,
    DateTime,
    Time,
    CreatedTime,
    LastModifiedTime,
    JSON,
    Attachment,
    User,
    CreatedBy,
    LastModifiedBy,
    Formula,
    Rollup,
    Lookup,
    LinkToAnotherRecord,
    Links,
    Button,
    QrCode,
    Barcode,
    AIField,
}

impl Uidt {
    pub const ALL: [Uidt; 37] = [
        Uidt::ID,
        Uidt::ForeignKey,
        Uidt::SingleLineText,
        Uidt::LongText,
        Uidt::Email,
        Uidt::URL,
        Uidt::PhoneNumber,
        Uidt::Number,
        Uidt::Decimal,
        Uidt::Currency,
        Uidt::Percent,
        Uidt::Rating,
        Uidt::Duration,
        Uidt::Year,
        Uidt::AutoNumber,
        Uidt::Checkbox,
        Uidt::SingleSelect,
        Uidt::MultiSelect,
        Uidt::Date,
        Uidt::DateTime,
        Uidt::Time,
        Uidt::CreatedTime,
        Uidt::LastModifiedTime,
        Uidt::JSON,
        Uidt::Attachment,
        Uidt::User,
        Uidt::CreatedBy,
        Uidt::LastModifiedBy,
        Uidt::Formula,
        Uidt::Rollup,
        Uidt::Lookup,
        Uidt::LinkToAnotherRecord,
        Uidt::Links,
        Uidt::Button,
        Uidt::QrCode,
        Uidt::Barcode,
        Uidt::AIField,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Uidt::ID => "ID",
            Uidt::ForeignKey => "ForeignKey",
            Uidt::SingleLineText => "SingleLineText",
            Uidt::LongText => "LongText",
            Uidt::Email => "Email",
            Uidt::URL => "URL",
            Uidt::PhoneNumber => "PhoneNumber",
            Uidt::Number => "Number",
            Uidt::Decimal => "Decimal",
            Uidt::Currency => "Currency",
            Uidt::Percent => "Percent",
            Uidt::Rating => "Rating",
            Uidt::Duration => "Duration",
            Uidt::Year => "Year",
            Uidt::AutoNumber => "AutoNumber",
            Uidt::Checkbox => "Checkbox",
            Uidt::SingleSelect => "SingleSelect",
            Uidt::MultiSelect => "MultiSelect",
            Uidt::Date => "Date",
            Uidt::DateTime => "DateTime",
            Uidt::Time => "Time",
            Uidt::CreatedTime => "CreatedTime",
            Uidt::LastModifiedTime => "LastModifiedTime",
            Uidt::JSON => "JSON",
            Uidt::Attachment => "Attachment",
            Uidt::User => "User",
            Uidt::CreatedBy => "CreatedBy",
            Uidt::LastModifiedBy => "LastModifiedBy",
            Uidt::Formula => "Formula",
            Uidt::Rollup => "Rollup",
            Uidt::Lookup => "Lookup",
            Uidt::LinkToAnotherRecord => "LinkToAnotherRecord",
            Uidt::Links => "Links",
            Uidt::Button => "Button",
            Uidt::QrCode => "QrCode",
            Uidt::Barcode => "Barcode",
            Uidt::AIField => "AIField",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Uidt::Number
                | Uidt::Decimal
                | Uidt::Currency
                | Uidt::Percent
                | Uidt::Rating
                | Uidt::Duration
                | Uidt::Year
                | Uidt::AutoNumber
                | Uidt::Rollup
                | Uidt::Links
        )
    }

    pub fn is_date_like(&self) -> bool {
        matches!(
            self,
            Uidt::Date | Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime
        )
    }

    /// Columns whose value is computed rather than stored.
    pub fn is_virtual(&self) -> bool {
        matches!(
            self,
            Uidt::Formula
                | Uidt::Rollup
                | Uidt::Lookup
                | Uidt::LinkToAnotherRecord
                | Uidt::Links
                | Uidt::Button
                | Uidt::QrCode
                | Uidt::Barcode
        )
    }
}

impl fmt::Display for Uidt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "hm")]
    HasMany,
    #[serde(rename = "bt")]
    BelongsTo,
    #[serde(rename = "mm")]
    ManyToMany,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationType::HasMany => "hm",
            RelationType::BelongsTo => "bt",
            RelationType::ManyToMany => "mm",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RollupFunction {
    Count,
    Min,
    Max,
    Avg,
    Sum,
    CountDistinct,
    SumDistinct,
    AvgDistinct,
}

impl FromStr for RollupFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown rollup function '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaOptions {
    pub formula: String,
    pub parsed: Option<FormulaAst>,
    pub error: Option<String>,
}

impl FormulaOptions {
    pub fn new(formula: impl Into<String>) -> Self {
        let formula = formula.into();
        match parse_formula(&formula) {
            Ok(ast) => Self {
                formula,
                parsed: Some(ast),
                error: None,
            },
            Err(err) => Self {
                formula,
                parsed: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LookupOptions {
    #[serde(alias = "fk_relation_column_id")]
    pub relation_column_id: String,
    #[serde(alias = "fk_lookup_column_id")]
    pub target_column_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RollupOptions {
    #[serde(alias = "fk_relation_column_id")]
    pub relation_column_id: String,
    #[serde(alias = "fk_rollup_column_id")]
    pub target_column_id: String,
    #[serde(alias = "rollup_function")]
    pub function: RollupFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkOptions {
    #[serde(rename = "type", alias = "relation_type")]
    pub relation_type: RelationType,
    #[serde(alias = "fk_related_model_id")]
    pub related_model_id: String,
    #[serde(alias = "fk_child_column_id")]
    pub child_column_id: String,
    #[serde(alias = "fk_parent_column_id")]
    pub parent_column_id: String,
    #[serde(default, alias = "fk_mm_model_id")]
    pub junction_model_id: Option<String>,
    #[serde(default, alias = "fk_mm_child_column_id")]
    pub junction_child_column_id: Option<String>,
    #[serde(default, alias = "fk_mm_parent_column_id")]
    pub junction_parent_column_id: Option<String>,
    /// When set, must agree with the related model's base.
    #[serde(default, alias = "fk_related_base_id")]
    pub related_base_id: Option<String>,
    #[serde(default, alias = "fk_mm_base_id")]
    pub junction_base_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ButtonOptions {
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "type")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QrCodeOptions {
    #[serde(alias = "fk_qr_value_column_id")]
    pub value_column_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BarcodeOptions {
    #[serde(alias = "fk_barcode_value_column_id")]
    pub value_column_id: String,
    #[serde(default)]
    pub barcode_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AiFieldOptions {
    #[serde(default)]
    pub prompt: String,
}

/// Type-specific options. Exactly one variant per column, chosen by its `Uidt`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColOptions {
    Plain,
    Formula(FormulaOptions),
    Lookup(LookupOptions),
    Rollup(RollupOptions),
    Link(LinkOptions),
    Button(ButtonOptions),
    QrCode(QrCodeOptions),
    Barcode(BarcodeOptions),
    AiField(AiFieldOptions),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: String,
    pub model_id: String,
    pub title: String,
    pub column_name: String,
    pub uidt: Uidt,
    pub primary_key: bool,
    pub display_value: bool,
    pub system: bool,
    pub options: ColOptions,
}

impl Column {
    /// A stored column with no type-specific options.
    pub fn plain(
        id: impl Into<String>,
        model_id: impl Into<String>,
        title: impl Into<String>,
        column_name: impl Into<String>,
        uidt: Uidt,
    ) -> Self {
        Self {
            id: id.into(),
            model_id: model_id.into(),
            title: title.into(),
            column_name: column_name.into(),
            uidt,
            primary_key: false,
            display_value: false,
            system: false,
            options: ColOptions::Plain,
        }
    }

    pub fn with_options(mut self, options: ColOptions) -> Self {
        self.options = options;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn display(mut self) -> Self {
        self.display_value = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    pub fn link_options(&self) -> Option<&LinkOptions> {
        match &self.options {
            ColOptions::Link(opts) => Some(opts),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.uidt, Uidt::LinkToAnotherRecord | Uidt::Links)
    }

    pub fn formula_error(&self) -> Option<&str> {
        match &self.options {
            ColOptions::Formula(opts) => opts.error.as_deref(),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawColumn {
    id: String,
    #[serde(alias = "fk_model_id")]
    model_id: String,
    title: String,
    #[serde(default)]
    column_name: Option<String>,
    uidt: Uidt,
    #[serde(default, alias = "pk")]
    primary_key: bool,
    #[serde(default, alias = "pv")]
    display_value: bool,
    #[serde(default)]
    system: bool,
    #[serde(default, alias = "colOptions")]
    col_options: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawFormula {
    #[serde(alias = "formula_raw")]
    formula: String,
    #[serde(default)]
    error: Option<String>,
}

fn decode_options<T, E>(uidt: Uidt, raw: Option<serde_json::Value>) -> Result<T, E>
where
    T: serde::de::DeserializeOwned,
    E: serde::de::Error,
{
    let value = raw.ok_or_else(|| E::custom(format!("{uidt} column requires colOptions")))?;
    serde_json::from_value(value).map_err(|e| E::custom(format!("invalid {uidt} colOptions: {e}")))
}

impl<'de> Deserialize<'de> for Column {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawColumn::deserialize(deserializer)?;
        let options = match raw.uidt {
            Uidt::Formula => {
                let formula: RawFormula = decode_options(raw.uidt, raw.col_options)?;
                let mut opts = FormulaOptions::new(formula.formula);
                if opts.error.is_none() {
                    opts.error = formula.error;
                }
                ColOptions::Formula(opts)
            }
            Uidt::Lookup => ColOptions::Lookup(decode_options(raw.uidt, raw.col_options)?),
            Uidt::Rollup => ColOptions::Rollup(decode_options(raw.uidt, raw.col_options)?),
            Uidt::LinkToAnotherRecord | Uidt::Links => {
                ColOptions::Link(decode_options(raw.uidt, raw.col_options)?)
            }
            Uidt::QrCode => ColOptions::QrCode(decode_options(raw.uidt, raw.col_options)?),
            Uidt::Barcode => ColOptions::Barcode(decode_options(raw.uidt, raw.col_options)?),
            Uidt::Button => ColOptions::Button(
                raw.col_options
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(serde::de::Error::custom)?
                    .unwrap_or_default(),
            ),
            Uidt::AIField => ColOptions::AiField(
                raw.col_options
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(serde::de::Error::custom)?
                    .unwrap_or_default(),
            ),
            _ => ColOptions::Plain,
        };
        let column_name = raw.column_name.unwrap_or_else(|| raw.title.clone());
        Ok(Column {
            id: raw.id,
            model_id: raw.model_id,
            title: raw.title,
            column_name,
            uidt: raw.uidt,
            primary_key: raw.primary_key,
            display_value: raw.display_value,
            system: raw.system,
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_options_accept_meta_store_field_names() {
        let col: Column = serde_json::from_value(json!({
            "id": "c1",
            "fk_model_id": "m1",
            "title": "Orders",
            "uidt": "Links",
            "colOptions": {
                "type": "hm",
                "fk_related_model_id": "m2",
                "fk_child_column_id": "c9",
                "fk_parent_column_id": "c0"
            }
        }))
        .unwrap();
        let opts = col.link_options().unwrap();
        assert_eq!(opts.relation_type, RelationType::HasMany);
        assert_eq!(opts.related_model_id, "m2");
        assert!(opts.junction_model_id.is_none());
        assert_eq!(col.column_name, "Orders");
    }

    #[test]
    fn options_must_match_uidt() {
        let err = serde_json::from_value::<Column>(json!({
            "id": "c1",
            "model_id": "m1",
            "title": "Total",
            "uidt": "Rollup"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Rollup column requires colOptions"));
    }

    #[test]
    fn formula_is_parsed_on_load() {
        let col: Column = serde_json::from_value(json!({
            "id": "c1",
            "model_id": "m1",
            "title": "Full",
            "uidt": "Formula",
            "colOptions": { "formula": "CONCAT({First}, \" \", {Last})" }
        }))
        .unwrap();
        match &col.options {
            ColOptions::Formula(opts) => {
                assert!(opts.parsed.is_some());
                assert!(opts.error.is_none());
            }
            other => panic!("unexpected options {other:?}"),
        }
    }

    #[test]
    fn broken_formula_keeps_error() {
        let opts = FormulaOptions::new("CONCAT({A}, ");
        assert!(opts.parsed.is_none());
        assert!(opts.error.is_some());
    }

    #[test]
    fn rollup_function_names() {
        assert_eq!(
            "countDistinct".parse::<RollupFunction>().unwrap(),
            RollupFunction::CountDistinct
        );
        assert!("median".parse::<RollupFunction>().is_err());
    }
}
