// Bounded text excerpt for the classification service.

use ai_client::util::truncate_to_char_boundary;
use scraper::Html;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use promotrack_common::ContentFormat;

use super::rules::collapse_whitespace;

pub const EXCERPT_BYTES: usize = 12_000;

/// Whole-page markdown. Main-content cropping is off so banners and
/// header strips, where promotions usually sit, survive.
fn html_to_markdown(html: &str, url: &str) -> String {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: false,
        main_content: false,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    transform_content_input(input, &config)
}

fn visible_text(html: &str) -> String {
    Html::parse_document(html)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn excerpt(content: &str, format: ContentFormat, url: &str) -> String {
    let text = match format {
        ContentFormat::Html => {
            let markdown = html_to_markdown(content, url);
            if markdown.trim().is_empty() {
                visible_text(content)
            } else {
                markdown
            }
        }
        ContentFormat::Markdown => content.to_string(),
    };
    let collapsed = collapse_whitespace(&text);
    truncate_to_char_boundary(&collapsed, EXCERPT_BYTES).to_string()
}
