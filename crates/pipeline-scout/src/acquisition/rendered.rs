//! Tier 2: rendered acquisition through a browser context.

use super::error::{AcquisitionError, AcquisitionErrorKind, AcquisitionMethod};
use super::html_text::{char_len, collapse_whitespace};
use crate::config::FetchSettings;
use crate::renderer::{with_context, Renderer};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Selector hinting that pipeline content has rendered.
pub const PIPELINE_SELECTOR: &str =
    r#"table, .pipeline, [class*="pipeline"], [id*="pipeline"]"#;

/// Section text outside this char window is noise or a whole-page dump.
const SECTION_MIN_CHARS: usize = 21;
const SECTION_MAX_CHARS: usize = 4_999;

/// Removes page chrome, then snapshots body text, tables, lists and
/// pipeline-looking sections as a JSON string.
const SNAPSHOT_SCRIPT: &str = r#"
(() => {
  const noise = 'script, style, noscript, nav, header, footer, iframe, svg, template, '
    + '[class*="cookie"], [id*="cookie"], [class*="consent"], [id*="consent"], '
    + '[class*="advert"], [id*="advert"]';
  document.querySelectorAll(noise).forEach(el => el.remove());
  const clean = t => (t || '').replace(/\s+/g, ' ').trim();
  const body = document.body ? clean(document.body.innerText) : '';
  const tables = [];
  document.querySelectorAll('tr').forEach(tr => {
    const cells = Array.from(tr.querySelectorAll('th, td')).map(c => clean(c.innerText));
    if (cells.some(c => c.length > 0)) tables.push(cells);
  });
  const lists = [];
  document.querySelectorAll('li').forEach(li => {
    const t = clean(li.innerText);
    if (t) lists.push(t);
  });
  const sections = [];
  const hint = '[class*="pipeline"], [id*="pipeline"], [class*="product"], [id*="product"], '
    + '[class*="drug"], [id*="drug"], [class*="candidate"], [id*="candidate"]';
  document.querySelectorAll(hint).forEach(el => sections.push(clean(el.innerText)));
  return JSON.stringify({ body, tables, lists, sections });
})()
"#;

/// Raw page snapshot returned by the in-page script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageSnapshot {
    pub body: String,
    pub tables: Vec<Vec<String>>,
    pub lists: Vec<String>,
    pub sections: Vec<String>,
}

/// Concatenate a snapshot into one text blob.
///
/// Body text comes first with no marker. Each other section is emitted only
/// when it has content. Pipeline sections are filtered by length.
pub fn assemble_rendered_content(snapshot: &PageSnapshot) -> String {
    let mut parts: Vec<String> = Vec::new();

    let body = collapse_whitespace(&snapshot.body);
    if !body.is_empty() {
        parts.push(body);
    }

    let rows: Vec<String> = snapshot
        .tables
        .iter()
        .map(|row| {
            row.iter()
                .map(|c| collapse_whitespace(c))
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .filter(|row| !row.trim_matches(|c| c == ' ' || c == '|').is_empty())
        .collect();
    if !rows.is_empty() {
        parts.push(format!("=== TABLES ===\n{}", rows.join("\n")));
    }

    let items: Vec<String> = snapshot
        .lists
        .iter()
        .map(|i| collapse_whitespace(i))
        .filter(|i| !i.is_empty())
        .map(|i| format!("- {i}"))
        .collect();
    if !items.is_empty() {
        parts.push(format!("=== LISTS ===\n{}", items.join("\n")));
    }

    let sections: Vec<String> = snapshot
        .sections
        .iter()
        .map(|s| collapse_whitespace(s))
        .filter(|s| (SECTION_MIN_CHARS..=SECTION_MAX_CHARS).contains(&char_len(s)))
        .collect();
    if !sections.is_empty() {
        parts.push(format!("=== PIPELINE SECTIONS ===\n{}", sections.join("\n")));
    }

    parts.join("\n\n")
}

/// Render `url` in an isolated context and return its assembled content.
pub async fn render_page(
    renderer: &dyn Renderer,
    settings: &FetchSettings,
    url: &str,
) -> Result<String, AcquisitionError> {
    let fail = |kind, message: String| {
        AcquisitionError::new(kind, AcquisitionMethod::Rendered, url, message)
    };

    let target = url.to_string();
    let cfg = settings.clone();
    let snapshot = with_context(renderer, move |ctx| {
        Box::pin(async move {
            let nav = ctx.navigate(&target, cfg.render_timeout_ms).await?;
            tokio::time::sleep(Duration::from_millis(cfg.settle_ms)).await;

            let found = ctx
                .wait_for_selector(PIPELINE_SELECTOR, cfg.selector_timeout_ms)
                .await
                .unwrap_or(false);
            debug!(url = %nav.final_url, load_ms = nav.load_time_ms, found, "page rendered");

            let raw = ctx.execute_js(SNAPSHOT_SCRIPT).await?;
            let snapshot = match raw {
                serde_json::Value::String(s) => serde_json::from_str::<PageSnapshot>(&s)?,
                other => serde_json::from_value::<PageSnapshot>(other)?,
            };
            Ok::<_, anyhow::Error>(snapshot)
        })
    })
    .await
    .map_err(|e| {
        let message = format!("{e:#}");
        fail(AcquisitionErrorKind::from_message(&message), message)
    })?;

    let content = assemble_rendered_content(&snapshot);
    let chars = char_len(&content);
    if chars < settings.min_rendered_chars {
        return Err(fail(
            AcquisitionErrorKind::TooShort,
            format!("rendered content has {chars} chars"),
        ));
    }
    Ok(content)
}
