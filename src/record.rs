use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Portal login pair. Lives only for the duration of one scan.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.user.trim().is_empty() && !self.secret.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Distributor regions offered by the portal's "distribuidora" filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    Campos,
    Lagos,
    Macae,
    Mage,
    Niteroi,
    SaoGoncalo,
    Serrana,
    Sul,
    Noroeste,
}

impl Region {
    pub const ALL: [Region; 9] = [
        Region::Campos,
        Region::Lagos,
        Region::Macae,
        Region::Mage,
        Region::Niteroi,
        Region::SaoGoncalo,
        Region::Serrana,
        Region::Sul,
        Region::Noroeste,
    ];

    /// Text typed into the portal's autocomplete, exactly as the portal lists it.
    pub fn label(&self) -> &'static str {
        match self {
            Region::Campos => "Campos",
            Region::Lagos => "Lagos",
            Region::Macae => "Macaé",
            Region::Mage => "Magé",
            Region::Niteroi => "Niterói",
            Region::SaoGoncalo => "São Gonçalo",
            Region::Serrana => "Serrana",
            Region::Sul => "Sul",
            Region::Noroeste => "Noroeste",
        }
    }

    /// ASCII form accepted on the command line.
    pub fn slug(&self) -> &'static str {
        match self {
            Region::Campos => "campos",
            Region::Lagos => "lagos",
            Region::Macae => "macae",
            Region::Mage => "mage",
            Region::Niteroi => "niteroi",
            Region::SaoGoncalo => "sao-goncalo",
            Region::Serrana => "serrana",
            Region::Sul => "sul",
            Region::Noroeste => "noroeste",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        let wanted_slug = wanted.replace([' ', '_'], "-");
        Region::ALL
            .iter()
            .copied()
            .find(|r| r.label().to_lowercase() == wanted || r.slug() == wanted_slug)
            .ok_or_else(|| {
                let names: Vec<&str> = Region::ALL.iter().map(|r| r.label()).collect();
                format!("Unknown region '{}'. Expected one of: {}", s, names.join(", "))
            })
    }
}

/// State + distributor pair applied through the portal's filter widgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSelector {
    pub state: String,
    pub distributor: String,
}

impl RegionSelector {
    pub fn new(state: impl Into<String>, region: Region) -> Self {
        Self {
            state: state.into(),
            distributor: region.label().to_string(),
        }
    }
}

/// One row read from the portal's result grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRecord {
    pub order_number: String,
    pub record_id: String,
    pub company_name: String,
    pub created_at: String,
    pub status_name: String,
}

/// An active record as written to the output spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "Ordem")]
    pub order_number: String,
    #[serde(rename = "ID_tabela")]
    pub record_id: String,
    #[serde(rename = "Empresa")]
    pub company_name: String,
    #[serde(rename = "Data_Criacao")]
    pub created_at: String,
    #[serde(rename = "Status")]
    pub status_name: String,
    #[serde(rename = "Validade_APR")]
    pub validity_end: String,
    #[serde(rename = "Retirado_em")]
    pub retrieved_at: String,
}

impl ResultRow {
    /// Output column headers, in file order.
    pub const COLUMNS: [&'static str; 7] = [
        "Ordem",
        "ID_tabela",
        "Empresa",
        "Data_Criacao",
        "Status",
        "Validade_APR",
        "Retirado_em",
    ];

    pub fn from_record(record: PortalRecord, validity_end: String, retrieved_at: String) -> Self {
        Self {
            order_number: record.order_number,
            record_id: record.record_id,
            company_name: record.company_name,
            created_at: record.created_at,
            status_name: record.status_name,
            validity_end,
            retrieved_at,
        }
    }

    pub fn values(&self) -> [&str; 7] {
        [
            &self.order_number,
            &self.record_id,
            &self.company_name,
            &self.created_at,
            &self.status_name,
            &self.validity_end,
            &self.retrieved_at,
        ]
    }
}
