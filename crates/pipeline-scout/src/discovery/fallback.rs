//! Static domain knowledge used when search turns up too little.

/// Known entity name to primary domain. Order matters for partial matches.
const KNOWN_DOMAINS: &[(&str, &str)] = &[
    ("pfizer", "pfizer.com"),
    ("novartis", "novartis.com"),
    ("roche", "roche.com"),
    ("johnson & johnson", "jnj.com"),
    ("merck", "merck.com"),
    ("gsk", "gsk.com"),
    ("glaxosmithkline", "gsk.com"),
    ("astrazeneca", "astrazeneca.com"),
    ("sanofi", "sanofi.com"),
    ("bayer", "bayer.com"),
    ("bristol myers squibb", "bms.com"),
    ("bms", "bms.com"),
    ("abbvie", "abbvie.com"),
    ("amgen", "amgen.com"),
    ("gilead", "gilead.com"),
    ("eli lilly", "lilly.com"),
    ("lilly", "lilly.com"),
    ("boehringer ingelheim", "boehringer-ingelheim.com"),
    ("takeda", "takeda.com"),
    ("biogen", "biogen.com"),
    ("regeneron", "regeneron.com"),
    ("moderna", "modernatx.com"),
    ("biontech", "biontech.com"),
];

/// Conventional locations of a pipeline page.
pub const PIPELINE_PATHS: &[&str] = &["/pipeline", "/science/pipeline"];

/// Look the entity up in the known-domain table, exact match first.
pub fn known_domain(entity: &str) -> Option<&'static str> {
    let name = entity.trim().to_lowercase();
    if !name.chars().any(char::is_alphanumeric) {
        return None;
    }

    if let Some((_, domain)) = KNOWN_DOMAINS.iter().find(|(key, _)| *key == name) {
        return Some(domain);
    }

    KNOWN_DOMAINS
        .iter()
        .find(|(key, _)| name.contains(key) || key.contains(name.as_str()))
        .map(|(_, domain)| *domain)
}

/// Best-effort domain: table lookup, else `<firstToken>.com`.
pub fn guess_domain(entity: &str) -> Option<String> {
    if let Some(domain) = known_domain(entity) {
        return Some(domain.to_string());
    }

    let first: String = entity
        .split_whitespace()
        .next()?
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();
    let first = first.trim_matches('-');
    if first.is_empty() {
        return None;
    }
    Some(format!("{first}.com"))
}

/// Candidate URLs under the guessed domain, one per conventional path.
pub fn generate_fallback_urls(entity: &str) -> Vec<String> {
    let Some(domain) = guess_domain(entity) else {
        return Vec::new();
    };
    PIPELINE_PATHS
        .iter()
        .map(|path| format!("https://www.{domain}{path}"))
        .collect()
}
