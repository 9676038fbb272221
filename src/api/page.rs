//! HTML shell around the chart fragment.

use crate::charts::svg::escape_html;

const STYLE: &str = "body{font-family:sans-serif;margin:1em 2em}\
header{display:flex;gap:1em;align-items:center}\
select{font-size:1em}";

/// Dashboard page for `region` with a selector over every known region.
pub fn dashboard(region: &str, regions: &[String], chart: &str, log_scale: bool) -> String {
    let region_html = escape_html(region);

    let mut options = String::new();
    for name in regions {
        let selected = if name == region { " selected" } else { "" };
        let name = escape_html(name);
        options.push_str(&format!(
            "<option value=\"{}\"{}>{}</option>\n",
            name, selected, name
        ));
    }

    let scale_link = if log_scale {
        "<a href=\"?log=false\">linear scale</a>"
    } else {
        "<a href=\"?log=true\">log scale</a>"
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
<title>Coronaboard: {region}</title>\n<style>{style}</style>\n</head>\n<body>\n\
<header>\n<h1>{region}</h1>\n\
<select onchange=\"location.href='/'+encodeURIComponent(this.value)\">\n{options}</select>\n\
{scale_link}\n</header>\n{chart}</body>\n</html>\n",
        region = region_html,
        style = STYLE,
        options = options,
        scale_link = scale_link,
        chart = chart,
    )
}

/// Plain page for failures (no data, upstream down).
pub fn message(title: &str, detail: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
<title>Coronaboard: {title}</title>\n<style>{style}</style>\n</head>\n<body>\n\
<h1>{title}</h1>\n<p>{detail}</p>\n<p><a href=\"/\">World</a></p>\n</body>\n</html>\n",
        title = escape_html(title),
        detail = escape_html(detail),
        style = STYLE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_marks_current_region_and_escapes_names() {
        let regions = vec!["Cote d'Ivoire".to_string(), "World".to_string()];
        let html = dashboard("World", &regions, "<div></div>", false);
        assert!(html.contains("<option value=\"World\" selected>World</option>"));
        assert!(html.contains("<option value=\"Cote d&#39;Ivoire\">"));
        assert!(html.contains("?log=true"));
        assert!(html.contains("<div></div>"));
    }

    #[test]
    fn test_message_escapes_detail() {
        let html = message("no data", "<script>");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
