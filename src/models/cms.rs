use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ApiError;
use crate::store::Store;

/// Key of the one and only CMS document.
pub const CMS_DOCUMENT_KEY: &str = "main";

/// Sections as stored: section key -> JSON content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCmsDocument {
    pub sections: Map<String, Value>,
    pub updated_at: Option<String>,
}

// ── Sections ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    PricingTables,
    BrandsWithLogos,
    CompanyInfo,
    Seo,
    AboutPage,
    ContactPage,
    RegisteredContractors,
    LicensedBuilders,
    Testimonials,
    Certificates,
}

impl Section {
    pub const ALL: [Section; 10] = [
        Section::PricingTables,
        Section::BrandsWithLogos,
        Section::CompanyInfo,
        Section::Seo,
        Section::AboutPage,
        Section::ContactPage,
        Section::RegisteredContractors,
        Section::LicensedBuilders,
        Section::Testimonials,
        Section::Certificates,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Section::PricingTables => "pricingTables",
            Section::BrandsWithLogos => "brandsWithLogos",
            Section::CompanyInfo => "companyInfo",
            Section::Seo => "seo",
            Section::AboutPage => "aboutPage",
            Section::ContactPage => "contactPage",
            Section::RegisteredContractors => "registeredContractors",
            Section::LicensedBuilders => "licensedBuilders",
            Section::Testimonials => "testimonials",
            Section::Certificates => "certificates",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key)
    }

    /// Whether the section is a list of records that carry identifiers.
    pub fn has_identity(self) -> bool {
        matches!(
            self,
            Section::PricingTables
                | Section::BrandsWithLogos
                | Section::RegisteredContractors
                | Section::LicensedBuilders
                | Section::Testimonials
                | Section::Certificates
        )
    }

    /// Deserialize a payload into this section's schema. Unknown fields are rejected.
    pub fn parse(self, payload: Value) -> Result<SectionContent, String> {
        fn from<T: DeserializeOwned>(v: Value) -> Result<T, String> {
            serde_json::from_value(v).map_err(|e| e.to_string())
        }
        Ok(match self {
            Section::PricingTables => SectionContent::PricingTables(from(payload)?),
            Section::BrandsWithLogos => SectionContent::BrandsWithLogos(from(payload)?),
            Section::CompanyInfo => SectionContent::CompanyInfo(from(payload)?),
            Section::Seo => SectionContent::Seo(from(payload)?),
            Section::AboutPage => SectionContent::AboutPage(from(payload)?),
            Section::ContactPage => SectionContent::ContactPage(from(payload)?),
            Section::RegisteredContractors => {
                SectionContent::RegisteredContractors(from(payload)?)
            }
            Section::LicensedBuilders => SectionContent::LicensedBuilders(from(payload)?),
            Section::Testimonials => SectionContent::Testimonials(from(payload)?),
            Section::Certificates => SectionContent::Certificates(from(payload)?),
        })
    }
}

// ── Section schemas ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PricingTable {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub rows: Vec<PriceRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PriceRow {
    #[serde(default)]
    pub id: String,
    pub service: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Brand {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompanyInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_hours: Option<String>,
    /// Singapore Unique Entity Number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uen: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeoSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub og_image: Option<String>,
    /// Per-page overrides keyed by path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pages: BTreeMap<String, PageSeo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PageSeo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AboutPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContactPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_embed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enquiry_email: Option<String>,
}

/// BCA registration entry (registered contractor workhead or builder licence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Registration {
    #[serde(default)]
    pub id: String,
    pub workhead: String,
    pub grade: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Testimonial {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub quote: String,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Certificate {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_on: Option<String>,
}

// ── Typed content ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SectionContent {
    PricingTables(Vec<PricingTable>),
    BrandsWithLogos(Vec<Brand>),
    CompanyInfo(CompanyInfo),
    Seo(SeoSettings),
    AboutPage(AboutPage),
    ContactPage(ContactPage),
    RegisteredContractors(Vec<Registration>),
    LicensedBuilders(Vec<Registration>),
    Testimonials(Vec<Testimonial>),
    Certificates(Vec<Certificate>),
}

impl SectionContent {
    pub fn section(&self) -> Section {
        match self {
            SectionContent::PricingTables(_) => Section::PricingTables,
            SectionContent::BrandsWithLogos(_) => Section::BrandsWithLogos,
            SectionContent::CompanyInfo(_) => Section::CompanyInfo,
            SectionContent::Seo(_) => Section::Seo,
            SectionContent::AboutPage(_) => Section::AboutPage,
            SectionContent::ContactPage(_) => Section::ContactPage,
            SectionContent::RegisteredContractors(_) => Section::RegisteredContractors,
            SectionContent::LicensedBuilders(_) => Section::LicensedBuilders,
            SectionContent::Testimonials(_) => Section::Testimonials,
            SectionContent::Certificates(_) => Section::Certificates,
        }
    }

    pub fn to_value(&self) -> Result<Value, String> {
        serde_json::to_value(self).map_err(|e| e.to_string())
    }

    pub fn validate(&self) -> Result<(), String> {
        let key = self.section().key();
        match self {
            SectionContent::PricingTables(tables) => {
                for (i, t) in tables.iter().enumerate() {
                    require(&t.title, &format!("{}[{}].title", key, i))?;
                    for (j, row) in t.rows.iter().enumerate() {
                        let at = format!("{}[{}].rows[{}]", key, i, j);
                        require(&row.service, &format!("{}.service", at))?;
                        if !row.price.is_finite() || row.price < 0.0 {
                            return Err(format!("{}.price must be a non-negative number", at));
                        }
                    }
                }
            }
            SectionContent::BrandsWithLogos(brands) => {
                for (i, b) in brands.iter().enumerate() {
                    require(&b.name, &format!("{}[{}].name", key, i))?;
                }
            }
            SectionContent::CompanyInfo(info) => {
                if let Some(email) = info.email.as_deref().filter(|e| !e.is_empty()) {
                    check_email(email, &format!("{}.email", key))?;
                }
            }
            SectionContent::Seo(seo) => {
                for path in seo.pages.keys() {
                    if !path.starts_with('/') {
                        return Err(format!("{}.pages key '{}' must start with '/'", key, path));
                    }
                }
            }
            SectionContent::AboutPage(_) => {}
            SectionContent::ContactPage(page) => {
                if let Some(email) = page.enquiry_email.as_deref().filter(|e| !e.is_empty()) {
                    check_email(email, &format!("{}.enquiryEmail", key))?;
                }
            }
            SectionContent::RegisteredContractors(regs)
            | SectionContent::LicensedBuilders(regs) => {
                for (i, r) in regs.iter().enumerate() {
                    let at = format!("{}[{}]", key, i);
                    require(&r.workhead, &format!("{}.workhead", at))?;
                    require(&r.grade, &format!("{}.grade", at))?;
                    check_date(r.expiry.as_deref(), &format!("{}.expiry", at))?;
                }
            }
            SectionContent::Testimonials(items) => {
                for (i, t) in items.iter().enumerate() {
                    let at = format!("{}[{}]", key, i);
                    require(&t.name, &format!("{}.name", at))?;
                    require(&t.quote, &format!("{}.quote", at))?;
                    if !(1..=5).contains(&t.rating) {
                        return Err(format!("{}.rating must be between 1 and 5", at));
                    }
                }
            }
            SectionContent::Certificates(certs) => {
                for (i, c) in certs.iter().enumerate() {
                    let at = format!("{}[{}]", key, i);
                    require(&c.title, &format!("{}.title", at))?;
                    check_date(c.issued_on.as_deref(), &format!("{}.issuedOn", at))?;
                }
            }
        }
        Ok(())
    }

    /// Give every record without an identifier a fresh one. Returns how many
    /// were minted; fails on duplicate identifiers within a list.
    pub fn assign_ids(&mut self) -> Result<usize, String> {
        let key = self.section().key();
        match self {
            SectionContent::PricingTables(tables) => {
                let mut minted = assign_ids(tables, key)?;
                for t in tables.iter_mut() {
                    minted += assign_ids(&mut t.rows, &format!("{} row", key))?;
                }
                Ok(minted)
            }
            SectionContent::BrandsWithLogos(items) => assign_ids(items, key),
            SectionContent::RegisteredContractors(items)
            | SectionContent::LicensedBuilders(items) => assign_ids(items, key),
            SectionContent::Testimonials(items) => assign_ids(items, key),
            SectionContent::Certificates(items) => assign_ids(items, key),
            SectionContent::CompanyInfo(_)
            | SectionContent::Seo(_)
            | SectionContent::AboutPage(_)
            | SectionContent::ContactPage(_) => Ok(0),
        }
    }
}

fn require(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} is required", field))
    } else {
        Ok(())
    }
}

fn check_email(value: &str, field: &str) -> Result<(), String> {
    match value.split_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(format!("{} is not a valid email address", field)),
    }
}

fn check_date(value: Option<&str>, field: &str) -> Result<(), String> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(|_| ())
            .map_err(|_| format!("{} must be a YYYY-MM-DD date", field)),
        None => Ok(()),
    }
}

// ── Identity ───────────────────────────────────────────

trait Identified {
    fn id_slot(&mut self) -> &mut String;
}

macro_rules! identified {
    ($($t:ty),*) => {
        $(impl Identified for $t {
            fn id_slot(&mut self) -> &mut String {
                &mut self.id
            }
        })*
    };
}

identified!(PricingTable, PriceRow, Brand, Registration, Testimonial, Certificate);

fn assign_ids<T: Identified>(items: &mut [T], what: &str) -> Result<usize, String> {
    let mut seen = HashSet::new();
    let mut minted = 0;
    for item in items.iter_mut() {
        let id = item.id_slot();
        if id.trim().is_empty() {
            *id = uuid::Uuid::new_v4().to_string();
            minted += 1;
        }
        if !seen.insert(id.clone()) {
            return Err(format!("duplicate {} id '{}'", what, id));
        }
    }
    Ok(minted)
}

// ── Document ───────────────────────────────────────────

/// The site's editable content. Sections that were never saved are `None`
/// and are left out of the serialized document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_tables: Option<Vec<PricingTable>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brands_with_logos: Option<Vec<Brand>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_info: Option<CompanyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo: Option<SeoSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_page: Option<AboutPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_page: Option<ContactPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_contractors: Option<Vec<Registration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub licensed_builders: Option<Vec<Registration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testimonials: Option<Vec<Testimonial>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificates: Option<Vec<Certificate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CmsDocument {
    pub fn section(&self, section: Section) -> Option<SectionContent> {
        match section {
            Section::PricingTables => self.pricing_tables.clone().map(SectionContent::PricingTables),
            Section::BrandsWithLogos => self
                .brands_with_logos
                .clone()
                .map(SectionContent::BrandsWithLogos),
            Section::CompanyInfo => self.company_info.clone().map(SectionContent::CompanyInfo),
            Section::Seo => self.seo.clone().map(SectionContent::Seo),
            Section::AboutPage => self.about_page.clone().map(SectionContent::AboutPage),
            Section::ContactPage => self.contact_page.clone().map(SectionContent::ContactPage),
            Section::RegisteredContractors => self
                .registered_contractors
                .clone()
                .map(SectionContent::RegisteredContractors),
            Section::LicensedBuilders => self
                .licensed_builders
                .clone()
                .map(SectionContent::LicensedBuilders),
            Section::Testimonials => self.testimonials.clone().map(SectionContent::Testimonials),
            Section::Certificates => self.certificates.clone().map(SectionContent::Certificates),
        }
    }

    pub fn set(&mut self, content: SectionContent) {
        match content {
            SectionContent::PricingTables(v) => self.pricing_tables = Some(v),
            SectionContent::BrandsWithLogos(v) => self.brands_with_logos = Some(v),
            SectionContent::CompanyInfo(v) => self.company_info = Some(v),
            SectionContent::Seo(v) => self.seo = Some(v),
            SectionContent::AboutPage(v) => self.about_page = Some(v),
            SectionContent::ContactPage(v) => self.contact_page = Some(v),
            SectionContent::RegisteredContractors(v) => self.registered_contractors = Some(v),
            SectionContent::LicensedBuilders(v) => self.licensed_builders = Some(v),
            SectionContent::Testimonials(v) => self.testimonials = Some(v),
            SectionContent::Certificates(v) => self.certificates = Some(v),
        }
    }

    /// Build the typed document from stored sections. Legacy aliases are
    /// mapped first; sections that no longer match their schema are skipped.
    pub fn from_raw(raw: &RawCmsDocument) -> Self {
        let sections = normalize_legacy(&raw.sections);
        let mut doc = CmsDocument {
            updated_at: raw.updated_at.clone(),
            ..Default::default()
        };
        for section in Section::ALL {
            let Some(value) = sections.get(section.key()) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            match section.parse(value.clone()) {
                Ok(content) => doc.set(content),
                Err(e) => log::warn!("Ignoring stored CMS section {}: {}", section.key(), e),
            }
        }
        doc
    }

    pub fn load(store: &dyn Store) -> Result<Self, String> {
        let raw = store.cms_load(CMS_DOCUMENT_KEY)?;
        Ok(raw.map(|r| Self::from_raw(&r)).unwrap_or_default())
    }

    /// Replace one whole section. The payload must match the section schema;
    /// records without identifiers get new ones. Nothing inside the section
    /// is merged with what was stored before.
    pub fn replace_section(
        store: &dyn Store,
        section: Section,
        payload: Value,
    ) -> Result<SectionContent, ApiError> {
        let mut content = section
            .parse(payload)
            .map_err(|e| ApiError::Validation(format!("invalid {}: {}", section.key(), e)))?;
        content.validate().map_err(ApiError::Validation)?;
        content.assign_ids().map_err(ApiError::Validation)?;
        let value = content.to_value().map_err(ApiError::Internal)?;
        store
            .cms_put_section(CMS_DOCUMENT_KEY, section.key(), &value)
            .map_err(ApiError::Internal)?;
        log::info!("CMS section {} replaced", section.key());
        Ok(content)
    }

    /// Write back list sections whose stored records lack identifiers, and
    /// sections only present under a legacy alias. Returns identifiers minted.
    pub fn backfill_ids(store: &dyn Store) -> Result<usize, String> {
        let Some(raw) = store.cms_load(CMS_DOCUMENT_KEY)? else {
            return Ok(0);
        };
        let sections = normalize_legacy(&raw.sections);
        let mut total = 0;
        for section in Section::ALL.into_iter().filter(|s| s.has_identity()) {
            let Some(value) = sections.get(section.key()).filter(|v| !v.is_null()) else {
                continue;
            };
            let mut content = match section.parse(value.clone()) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("Cannot backfill {}: {}", section.key(), e);
                    continue;
                }
            };
            let minted = match content.assign_ids() {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("Cannot backfill {}: {}", section.key(), e);
                    continue;
                }
            };
            let from_alias = !raw.sections.contains_key(section.key());
            if minted > 0 || from_alias {
                store.cms_put_section(CMS_DOCUMENT_KEY, section.key(), &content.to_value()?)?;
                log::info!("Backfilled {} id(s) in {}", minted, section.key());
                total += minted;
            }
        }
        Ok(total)
    }
}

/// Map legacy field names onto current section keys. The current key wins
/// when both are present.
fn normalize_legacy(sections: &Map<String, Value>) -> Map<String, Value> {
    let mut out = sections.clone();
    if !out.contains_key(Section::BrandsWithLogos.key()) {
        if let Some(Value::Array(names)) = sections.get("brands") {
            let brands: Vec<Value> = names
                .iter()
                .filter_map(|n| match n {
                    Value::String(name) => Some(json!({ "name": name })),
                    Value::Object(_) => Some(n.clone()),
                    _ => None,
                })
                .collect();
            out.insert(Section::BrandsWithLogos.key().to_string(), Value::Array(brands));
        }
    }
    if !out.contains_key(Section::CompanyInfo.key()) {
        if let Some(info) = sections.get("contactInfo").filter(|v| v.is_object()) {
            out.insert(Section::CompanyInfo.key().to_string(), info.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_keys_round_trip() {
        for s in Section::ALL {
            assert_eq!(Section::from_key(s.key()), Some(s));
        }
        assert_eq!(Section::from_key("nope"), None);
    }

    #[test]
    fn test_assign_ids_mints_missing_only() {
        let mut content = Section::Testimonials
            .parse(json!([
                { "id": "keep-me", "name": "Tan", "quote": "Cold air again", "rating": 5 },
                { "name": "Lim", "quote": "Fast job", "rating": 4 }
            ]))
            .unwrap();
        assert_eq!(content.assign_ids().unwrap(), 1);
        let SectionContent::Testimonials(items) = content else {
            panic!("wrong variant");
        };
        assert_eq!(items[0].id, "keep-me");
        assert!(!items[1].id.is_empty());
        assert_ne!(items[1].id, "keep-me");
    }

    #[test]
    fn test_assign_ids_rejects_duplicates() {
        let mut content = Section::BrandsWithLogos
            .parse(json!([{ "id": "a", "name": "Daikin" }, { "id": "a", "name": "Mitsubishi" }]))
            .unwrap();
        assert!(content.assign_ids().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_pricing_rows_get_ids() {
        let mut content = Section::PricingTables
            .parse(json!([{ "title": "General servicing", "rows": [
                { "service": "1 unit", "price": 30 },
                { "service": "2 units", "price": 50, "unit": "per visit" }
            ]}]))
            .unwrap();
        assert_eq!(content.assign_ids().unwrap(), 3);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(Section::CompanyInfo.parse(json!({ "name": "Acme", "fax": "123" })).is_err());
    }

    #[test]
    fn test_validation_rules() {
        let bad_rating = Section::Testimonials
            .parse(json!([{ "name": "A", "quote": "B", "rating": 6 }]))
            .unwrap();
        assert!(bad_rating.validate().is_err());

        let bad_price = Section::PricingTables
            .parse(json!([{ "title": "T", "rows": [{ "service": "S", "price": -1 }] }]))
            .unwrap();
        assert!(bad_price.validate().is_err());

        let bad_expiry = Section::RegisteredContractors
            .parse(json!([{ "workhead": "ME05", "grade": "L1", "expiry": "next year" }]))
            .unwrap();
        assert!(bad_expiry.validate().is_err());

        let bad_email = Section::CompanyInfo.parse(json!({ "email": "nope" })).unwrap();
        assert!(bad_email.validate().is_err());

        let bad_page = Section::Seo
            .parse(json!({ "pages": { "about": { "title": "About" } } }))
            .unwrap();
        assert!(bad_page.validate().is_err());

        let ok = Section::LicensedBuilders
            .parse(json!([{ "workhead": "GB1", "grade": "Class 1", "expiry": "2027-03-31" }]))
            .unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_legacy_aliases() {
        let mut sections = Map::new();
        sections.insert("brands".into(), json!(["Daikin", "Panasonic"]));
        sections.insert("contactInfo".into(), json!({ "phone": "+65 6123 4567" }));
        let doc = CmsDocument::from_raw(&RawCmsDocument {
            sections,
            updated_at: None,
        });
        let brands = doc.brands_with_logos.unwrap();
        assert_eq!(brands.len(), 2);
        assert_eq!(brands[1].name, "Panasonic");
        assert_eq!(doc.company_info.unwrap().phone.as_deref(), Some("+65 6123 4567"));
    }

    #[test]
    fn test_canonical_key_wins_over_alias() {
        let mut sections = Map::new();
        sections.insert("brands".into(), json!(["Old"]));
        sections.insert("brandsWithLogos".into(), json!([{ "id": "b1", "name": "New" }]));
        let doc = CmsDocument::from_raw(&RawCmsDocument {
            sections,
            updated_at: None,
        });
        let brands = doc.brands_with_logos.unwrap();
        assert_eq!(brands.len(), 1);
        assert_eq!(brands[0].name, "New");
    }

    #[test]
    fn test_absent_sections_not_serialized() {
        let mut doc = CmsDocument::default();
        doc.set(SectionContent::AboutPage(AboutPage {
            heading: Some("About us".into()),
            ..Default::default()
        }));
        let v = serde_json::to_value(&doc).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(v["aboutPage"]["heading"], "About us");
    }
}
