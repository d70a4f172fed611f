//! HTML shells. The dashboard consumes the JSON routes; these pages only
//! need to render a browsable listing and the mesh settings shell.

use axum::response::Html;
use junknas_config::NodeConfig;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{}</title></head>\
         <body>{body}</body></html>",
        escape(title)
    )
}

/// Directory listing for `/` and `/browse/<rel>`.
pub fn listing_page(
    config: &NodeConfig,
    rel: &str,
    dirs: &[String],
    files: &[String],
) -> String {
    let mut body = String::new();
    body.push_str("<h1>junkNAS fileshare</h1>");
    body.push_str("<p><a href=\"/mesh/ui\">Mesh settings</a></p>");
    body.push_str(&format!(
        "<p>Mount point: {}</p>",
        escape(&config.mount_point)
    ));

    if !config.data_mount_points.is_empty() {
        body.push_str("<h2>Mesh mount points</h2><ul>");
        for mount in &config.data_mount_points {
            body.push_str(&format!("<li>{}</li>", escape(mount)));
        }
        body.push_str(&format!(
            "</ul><p>Updated at: {}</p>",
            config.data_mount_points_updated_at
        ));
    }

    body.push_str("<h2>Directory listing</h2><ul>");
    let prefix = if rel.is_empty() {
        String::new()
    } else {
        format!("{}/", escape(rel))
    };
    for dir in dirs {
        body.push_str(&format!(
            "<li><strong>{0}/</strong> (<a href=\"/browse/{prefix}{0}\">browse</a>)</li>",
            escape(dir)
        ));
    }
    for file in files {
        body.push_str(&format!(
            "<li><a href=\"/files/{prefix}{0}\">{0}</a></li>",
            escape(file)
        ));
    }
    body.push_str("</ul>");
    page("junkNAS fileshare", &body)
}

/// Shell at `/mesh/ui` and `/mesh`. The dashboard drives the JSON routes;
/// this page just loads the current role and config into placeholders.
pub async fn mesh_ui() -> Html<String> {
    let body = r#"
<h1>junkNAS mesh settings</h1>
<div id="mesh-role">Checking mesh status…</div>
<section><h2>Local node</h2><div id="self-info">Loading…</div></section>
<section><h2>Bootstrap peers</h2><div id="bootstrap-peers"></div></section>
<section><h2>WireGuard peers</h2><div id="wg-peers"></div></section>
<script>
async function load() {
  const status = await (await fetch('/mesh/status')).json();
  document.getElementById('mesh-role').textContent = 'Role: ' + (status.role || 'unknown');
  const config = await (await fetch('/mesh/config')).json();
  const self = config.self || {};
  document.getElementById('self-info').textContent =
    (self.public_key || '') + ' @ ' + (self.wg_ip || '') + ' (' + (self.endpoint || 'no endpoint') + ')';
  document.getElementById('bootstrap-peers').textContent =
    (config.bootstrap_peers || []).join(', ') || 'none';
  document.getElementById('wg-peers').textContent =
    (config.wg_peers || []).map(p => p.public_key + ' @ ' + p.wg_ip).join(', ') || 'none';
}
load();
</script>
"#;
    Html(page("junkNAS mesh", body))
}
