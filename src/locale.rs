//! src/locale.rs — maps a prospect's free-text language + country onto a
//! delivery-provider template id, degrading to the `{lang}_general` bucket
//! rather than erroring on unmapped countries.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailType {
    Initial,
    Followup,
}

/// English country names → ISO 3166-1 alpha-2.
const COUNTRIES_EN: &[(&str, &str)] = &[
    ("france", "FR"),
    ("belgium", "BE"),
    ("switzerland", "CH"),
    ("luxembourg", "LU"),
    ("canada", "CA"),
    ("united states", "US"),
    ("united states of america", "US"),
    ("united kingdom", "GB"),
    ("germany", "DE"),
    ("spain", "ES"),
    ("italy", "IT"),
    ("netherlands", "NL"),
    ("portugal", "PT"),
    ("austria", "AT"),
    ("ireland", "IE"),
    ("morocco", "MA"),
    ("tunisia", "TN"),
    ("algeria", "DZ"),
];

/// French country names, tried after the English table.
const COUNTRIES_FR: &[(&str, &str)] = &[
    ("france", "FR"),
    ("belgique", "BE"),
    ("suisse", "CH"),
    ("luxembourg", "LU"),
    ("canada", "CA"),
    ("états-unis", "US"),
    ("etats-unis", "US"),
    ("royaume-uni", "GB"),
    ("allemagne", "DE"),
    ("espagne", "ES"),
    ("italie", "IT"),
    ("pays-bas", "NL"),
    ("maroc", "MA"),
    ("tunisie", "TN"),
    ("algérie", "DZ"),
    ("algerie", "DZ"),
];

/// Provider template ids keyed by `{lang}_{REGION}` or `{lang}_general`.
const INITIAL_TEMPLATES: &[(&str, &str)] = &[
    ("en_US", "tmpl_initial_en_us"),
    ("en_GB", "tmpl_initial_en_gb"),
    ("fr_FR", "tmpl_initial_fr_fr"),
    ("fr_BE", "tmpl_initial_fr_be"),
    ("en_general", "tmpl_initial_en"),
    ("fr_general", "tmpl_initial_fr"),
];

const FOLLOWUP_TEMPLATES: &[(&str, &str)] = &[
    ("en_US", "tmpl_followup_en_us"),
    ("fr_FR", "tmpl_followup_fr_fr"),
    ("en_general", "tmpl_followup_en"),
    ("fr_general", "tmpl_followup_fr"),
];

/// Collapse a free-text language value to a two-letter code, defaulting "en".
pub fn normalize_language(language: Option<&str>) -> &'static str {
    let Some(raw) = language else { return "en" };
    let lang = raw.trim().to_lowercase();
    match lang.as_str() {
        "fr" | "french" | "français" | "francais" => "fr",
        "" => "en",
        _ => "en",
    }
}

/// Country full name (English or French) → region code.
pub fn country_code(country: &str) -> Option<&'static str> {
    let name = country.trim().to_lowercase();
    COUNTRIES_EN
        .iter()
        .chain(COUNTRIES_FR.iter())
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
}

/// Language used for AI content when the record carries no explicit language:
/// francophone regions get French, everything else English.
pub fn language_for_country(country: Option<&str>) -> &'static str {
    match country.and_then(country_code) {
        Some("FR" | "BE" | "LU" | "CH" | "MA" | "TN" | "DZ") => "fr",
        _ => "en",
    }
}

fn table(email_type: EmailType) -> &'static [(&'static str, &'static str)] {
    match email_type {
        EmailType::Initial => INITIAL_TEMPLATES,
        EmailType::Followup => FOLLOWUP_TEMPLATES,
    }
}

fn lookup(email_type: EmailType, key: &str) -> Option<&'static str> {
    table(email_type)
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, id)| *id)
}

/// Resolve a template id for the prospect's locale. `None` means no template
/// exists even in the general bucket; the caller records `template_missing`.
pub fn resolve_template(
    email_type: EmailType,
    language: Option<&str>,
    country: Option<&str>,
) -> Option<&'static str> {
    let lang = normalize_language(language);
    if let Some(region) = country.and_then(country_code) {
        if let Some(id) = lookup(email_type, &format!("{lang}_{region}")) {
            return Some(id);
        }
    }
    lookup(email_type, &format!("{lang}_general"))
}
