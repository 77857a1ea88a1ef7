//! [`PageSource`] over fetched HTML.
//!
//! Pages are fetched either directly or through a Browserless `/content`
//! endpoint (fully rendered DOM). "Reveal more" maps to requesting the next
//! page of a paginated listing when `page_param` is configured; without it a
//! page is a single snapshot and the completeness loop ends after its
//! confirmation step.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::page_source::{PageSource, ProductLink};
use crate::normalization::{display_form, normalize, Extraction};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Link text longer than this is a paragraph, not a name.
const MAX_LINK_TEXT_CHARS: usize = 100;

static FIRST_NUMBER: OnceLock<Regex> = OnceLock::new();

fn first_number() -> &'static Regex {
    FIRST_NUMBER.get_or_init(|| Regex::new(r"\d[\d,]*").expect("number pattern is a valid regex"))
}

/// How pages are turned into HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renderer {
    /// Plain GET; sees only server-rendered markup.
    Direct,
    /// Browserless `/content`: returns the DOM after client-side rendering.
    Browserless { base_url: String, token: Option<String> },
}

/// CSS selector lists used against the source site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSet {
    pub product_link: String,
    pub store_link: String,
    pub store_heading: String,
    pub expected_count: Option<String>,
}

impl Default for SelectorSet {
    fn default() -> Self {
        let cards = [r#"[class*="supplier"]"#, r#"[class*="card"]"#, r#"[class*="business"]"#];
        let headings = ["h1", "h2", "h3", "h4", "h5", "h6", ".title", ".name"];
        let store_heading = cards
            .iter()
            .flat_map(|card| headings.iter().map(move |h| format!("{card} {h}")))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            product_link: r#"a[href*="/categories/"]"#.to_string(),
            store_link: r#"a[href*="/supplier/"]"#.to_string(),
            store_heading,
            expected_count: None,
        }
    }
}

impl SelectorSet {
    /// Fail early on selectors that would otherwise error on every page.
    pub fn validate(&self) -> Result<()> {
        parse_selector(&self.product_link)?;
        parse_selector(&self.store_link)?;
        parse_selector(&self.store_heading)?;
        if let Some(s) = &self.expected_count {
            parse_selector(s)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HtmlSourceConfig {
    pub renderer: Renderer,
    pub selectors: SelectorSet,
    pub page_param: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for HtmlSourceConfig {
    fn default() -> Self {
        Self {
            renderer: Renderer::Direct,
            selectors: SelectorSet::default(),
            page_param: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct HtmlPageSource {
    client: Client,
    renderer: Renderer,
    selectors: SelectorSet,
    page_param: Option<String>,
    current: Option<Url>,
    fragments: Vec<String>,
    /// Identities of every candidate element seen since the last navigation.
    seen: HashSet<String>,
    next_page: u32,
}

impl HtmlPageSource {
    pub fn new(config: HtmlSourceConfig) -> Result<Self> {
        config.selectors.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            renderer: config.renderer,
            selectors: config.selectors,
            page_param: config.page_param,
            current: None,
            fragments: Vec::new(),
            seen: HashSet::new(),
            next_page: 2,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<(StatusCode, String)> {
        let resp = match &self.renderer {
            Renderer::Direct => self.client.get(url.as_str()).send().await?,
            Renderer::Browserless { base_url, token } => {
                let endpoint = content_endpoint(base_url, token.as_deref())?;
                self.client
                    .post(endpoint)
                    .json(&serde_json::json!({ "url": url.as_str() }))
                    .send()
                    .await?
            }
        };
        let status = resp.status();
        let body = resp.text().await?;
        Ok((status, body))
    }

    fn current(&self) -> Result<&Url> {
        self.current.as_ref().ok_or_else(|| anyhow!("no page loaded"))
    }
}

#[async_trait::async_trait]
impl PageSource for HtmlPageSource {
    #[instrument(skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).with_context(|| format!("invalid page url {url}"))?;
        let (status, body) = self.fetch(&parsed).await?;
        if !status.is_success() {
            bail!("{url} returned {status}");
        }
        self.seen = candidate_identities(&body, &parsed, &self.selectors)?
            .into_iter()
            .collect();
        self.current = Some(parsed);
        self.fragments = vec![body];
        self.next_page = 2;
        Ok(())
    }

    async fn reveal_more(&mut self) -> Result<()> {
        let Some(param) = self.page_param.clone() else {
            return Ok(());
        };
        let url = page_url(self.current()?, &param, self.next_page);
        self.next_page += 1;
        let (status, body) = self.fetch(&url).await?;
        if !status.is_success() {
            debug!(url = %url, %status, "no further page");
            return Ok(());
        }
        let mut added = 0usize;
        for id in candidate_identities(&body, &url, &self.selectors)? {
            if self.seen.insert(id) {
                added += 1;
            }
        }
        debug!(url = %url, added, "revealed page");
        if added > 0 {
            self.fragments.push(body);
        }
        Ok(())
    }

    async fn measure_extent(&mut self) -> Result<u64> {
        Ok(self.seen.len() as u64)
    }

    async fn extract_candidates(&mut self) -> Result<Vec<Extraction>> {
        let mut out = Vec::new();
        for fragment in &self.fragments {
            out.extend(extract_from_html(fragment, &self.selectors)?);
        }
        Ok(out)
    }

    async fn declared_expected_count(&mut self) -> Result<Option<u32>> {
        let Some(selector) = self.selectors.expected_count.as_deref() else {
            return Ok(None);
        };
        match self.fragments.first() {
            Some(html) => declared_count_from_html(html, selector),
            None => Ok(None),
        }
    }

    async fn product_links(&mut self) -> Result<Vec<ProductLink>> {
        let base = self.current()?.clone();
        match self.fragments.first() {
            Some(html) => links_from_html(html, &base, &self.selectors.product_link),
            None => Ok(Vec::new()),
        }
    }
}

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| anyhow!("invalid CSS selector {raw:?}: {e:?}"))
}

/// Browserless `/content` endpoint with the token as an encoded query pair.
fn content_endpoint(base_url: &str, token: Option<&str>) -> Result<Url> {
    let raw = format!("{}/content", base_url.trim_end_matches('/'));
    let mut url = Url::parse(&raw).with_context(|| format!("invalid renderer url {base_url}"))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

fn page_url(base: &Url, param: &str, page: u32) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(param, &page.to_string());
    }
    url
}

fn element_text(el: ElementRef<'_>) -> String {
    display_form(&el.text().collect::<String>())
}

/// Candidates from one HTML document: per store link the first non-empty
/// image alt, else the link text; then every heading inside a store card.
pub fn extract_from_html(html: &str, selectors: &SelectorSet) -> Result<Vec<Extraction>> {
    let doc = Html::parse_document(html);
    let link_sel = parse_selector(&selectors.store_link)?;
    let heading_sel = parse_selector(&selectors.store_heading)?;
    let img_sel = parse_selector("img")?;

    let mut out = Vec::new();
    for link in doc.select(&link_sel) {
        let alt = link
            .select(&img_sel)
            .filter_map(|img| img.value().attr("alt"))
            .map(display_form)
            .find(|alt| !alt.is_empty());
        let extraction = match alt {
            Some(alt) => Extraction::Found(alt),
            None => {
                let text = element_text(link);
                if text.is_empty() {
                    Extraction::NotFound
                } else if text.chars().count() >= MAX_LINK_TEXT_CHARS {
                    Extraction::Malformed(format!("link text too long ({} chars)", text.chars().count()))
                } else {
                    Extraction::Found(text)
                }
            }
        };
        out.push(extraction);
    }

    for heading in doc.select(&heading_sel) {
        let text = element_text(heading);
        if text.is_empty() {
            out.push(Extraction::NotFound);
        } else if text.chars().count() >= MAX_LINK_TEXT_CHARS {
            out.push(Extraction::Malformed(format!("heading too long ({} chars)", text.chars().count())));
        } else {
            out.push(Extraction::Found(text));
        }
    }
    Ok(out)
}

/// One identity per element that may carry a store name: store links by
/// resolved href plus normalized label, card headings by normalized text.
/// The same element served again on another page yields the same identity.
pub fn candidate_identities(html: &str, base: &Url, selectors: &SelectorSet) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let link_sel = parse_selector(&selectors.store_link)?;
    let heading_sel = parse_selector(&selectors.store_heading)?;
    let img_sel = parse_selector("img")?;

    let mut out = Vec::new();
    for link in doc.select(&link_sel) {
        let href = link.value().attr("href").unwrap_or_default();
        let href = base.join(href).map(String::from).unwrap_or_else(|_| href.to_string());
        let alts: String = link
            .select(&img_sel)
            .filter_map(|img| img.value().attr("alt"))
            .collect::<Vec<_>>()
            .join(" ");
        let label = normalize(&format!("{alts} {}", link.text().collect::<String>()));
        out.push(format!("link {href} {label}"));
    }
    for heading in doc.select(&heading_sel) {
        out.push(format!("heading {}", normalize(&heading.text().collect::<String>())));
    }
    Ok(out)
}

/// Links matching `selector`, hrefs resolved against `base`.
pub fn links_from_html(html: &str, base: &Url, selector: &str) -> Result<Vec<ProductLink>> {
    let doc = Html::parse_document(html);
    let sel = parse_selector(selector)?;
    let mut out = Vec::new();
    for a in doc.select(&sel) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let name = element_text(a);
        match base.join(href) {
            Ok(url) => out.push(ProductLink {
                name,
                url: url.to_string(),
            }),
            Err(e) => debug!(href, error = %e, "skipping unresolvable link"),
        }
    }
    Ok(out)
}

/// First integer in the text (or `data-count` attribute) of the element
/// matching `selector`.
pub fn declared_count_from_html(html: &str, selector: &str) -> Result<Option<u32>> {
    let doc = Html::parse_document(html);
    let sel = parse_selector(selector)?;
    let Some(el) = doc.select(&sel).next() else {
        return Ok(None);
    };
    let source = el
        .value()
        .attr("data-count")
        .map(str::to_string)
        .unwrap_or_else(|| el.text().collect::<String>());
    Ok(first_number()
        .find(&source)
        .and_then(|m| m.as_str().replace(',', "").parse::<u32>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 server answering `respond(path, request_no)`.
    async fn serve<F>(respond: F) -> String
    where
        F: Fn(&str, usize) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let respond = Arc::new(respond);
        let hits = Arc::new(AtomicUsize::new(0));
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let respond = respond.clone();
                let hits = hits.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&buf);
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = respond(&path, hits.fetch_add(1, Ordering::SeqCst));
                    let reply = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(reply.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn store_links(stores: &[(&str, &str)]) -> String {
        stores
            .iter()
            .map(|(id, name)| format!(r#"<a href="/supplier/{id}">{name}</a>"#))
            .collect()
    }

    fn paged_source() -> HtmlPageSource {
        HtmlPageSource::new(HtmlSourceConfig {
            page_param: Some("page".into()),
            ..HtmlSourceConfig::default()
        })
        .unwrap()
    }

    async fn extents_over_reveals(src: &mut HtmlPageSource, reveals: usize) -> Vec<u64> {
        let mut out = vec![src.measure_extent().await.unwrap()];
        for _ in 0..reveals {
            src.reveal_more().await.unwrap();
            out.push(src.measure_extent().await.unwrap());
        }
        out
    }

    fn found_names(extractions: Vec<Extraction>) -> Vec<String> {
        extractions
            .into_iter()
            .filter_map(|e| match e {
                Extraction::Found(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    const CATEGORY_PAGE: &str = r#"
        <html><body>
          <nav><a href="/categories/spa">Spa</a></nav>
          <div class="results-count">Showing <b>1,204</b> businesses</div>
          <ul>
            <li><a href="/supplier/101"><img alt="  Acme   Café " src="a.png"></a></li>
            <li><a href="/supplier/102"><img alt="" src="b.png">Golda</a></li>
            <li><a href="/supplier/103"><img src="c.png"></a></li>
          </ul>
          <div class="supplier-card"><h3>Roladin</h3><span class="name"> </span></div>
        </body></html>
    "#;

    #[test]
    fn default_selectors_are_valid() {
        SelectorSet::default().validate().unwrap();
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let selectors = SelectorSet {
            store_link: "a[href*=".into(),
            ..SelectorSet::default()
        };
        assert!(selectors.validate().is_err());
    }

    #[test]
    fn extracts_alt_then_text_then_headings() {
        let out = extract_from_html(CATEGORY_PAGE, &SelectorSet::default()).unwrap();
        assert_eq!(
            out,
            vec![
                Extraction::Found("Acme Café".into()),
                Extraction::Found("Golda".into()),
                Extraction::NotFound,
                Extraction::Found("Roladin".into()),
                Extraction::NotFound,
            ]
        );
        let base = Url::parse("https://buyme.example/categories/spa").unwrap();
        let ids = candidate_identities(CATEGORY_PAGE, &base, &SelectorSet::default()).unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], "link https://buyme.example/supplier/101 acme café");
    }

    #[test]
    fn resolves_relative_product_links() {
        let base = Url::parse("https://buyme.example/").unwrap();
        let links = links_from_html(CATEGORY_PAGE, &base, r#"a[href*="/categories/"]"#).unwrap();
        assert_eq!(
            links,
            vec![ProductLink {
                name: "Spa".into(),
                url: "https://buyme.example/categories/spa".into(),
            }]
        );
    }

    #[test]
    fn reads_declared_count() {
        assert_eq!(declared_count_from_html(CATEGORY_PAGE, ".results-count").unwrap(), Some(1204));
        assert_eq!(declared_count_from_html(CATEGORY_PAGE, ".missing").unwrap(), None);
        let attr = r#"<div id="total" data-count="37">many</div>"#;
        assert_eq!(declared_count_from_html(attr, "#total").unwrap(), Some(37));
    }

    #[test]
    fn page_url_replaces_existing_param() {
        let base = Url::parse("https://x.test/categories/spa?page=1&sort=az").unwrap();
        let next = page_url(&base, "page", 3);
        assert_eq!(next.as_str(), "https://x.test/categories/spa?sort=az&page=3");
    }

    #[test]
    fn browserless_token_is_encoded() {
        let url = content_endpoint("http://renderer:3000/", Some("a&b c")).unwrap();
        assert_eq!(url.as_str(), "http://renderer:3000/content?token=a%26b+c");
        let bare = content_endpoint("http://renderer:3000", None).unwrap();
        assert_eq!(bare.as_str(), "http://renderer:3000/content");
        assert!(content_endpoint("not a url", None).is_err());
    }

    #[tokio::test]
    async fn page_ignoring_pagination_does_not_grow_extent() {
        let base = serve(|_, n| {
            let body = format!("{}<!-- request {n} -->", store_links(&[("1", "Golda"), ("2", "Aroma")]));
            (200, body)
        })
        .await;
        let mut src = paged_source();
        src.navigate(&format!("{base}/categories/food")).await.unwrap();

        assert_eq!(extents_over_reveals(&mut src, 2).await, vec![2, 2, 2]);
        assert_eq!(found_names(src.extract_candidates().await.unwrap()), vec!["Golda", "Aroma"]);
    }

    #[tokio::test]
    async fn overlapping_pages_count_each_store_once() {
        let base = serve(|path, _| match path.split_once("page=").map(|(_, p)| p) {
            None => (200, store_links(&[("1", "Golda"), ("2", "Aroma")])),
            Some("2") => (200, store_links(&[("2", "Aroma"), ("3", "Roladin")])),
            Some(_) => (404, String::new()),
        })
        .await;
        let mut src = paged_source();
        src.navigate(&format!("{base}/categories/food")).await.unwrap();

        assert_eq!(extents_over_reveals(&mut src, 3).await, vec![2, 3, 3, 3]);
        assert_eq!(
            found_names(src.extract_candidates().await.unwrap()),
            vec!["Golda", "Aroma", "Aroma", "Roladin"]
        );

        // a new page starts from scratch
        src.navigate(&format!("{base}/categories/spa")).await.unwrap();
        assert_eq!(src.measure_extent().await.unwrap(), 2);
    }
}
