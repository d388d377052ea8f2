//! 像素中转页
//!
//! 按 provider 模板渲染第三方追踪脚本，再在客户端定时跳转。
//! 任意点击会立即跳转；无 JS 时由 meta refresh 兜底。
//!
//! Custom provider 的脚本原样插入，内容安全由配置者负责。

use std::fmt::Write;

use crate::storage::{PixelConfig, PixelProvider};

/// 激活像素中最大的跳转延迟（已限制在 0..=10000）
pub fn relay_delay_ms(pixels: &[PixelConfig]) -> u32 {
    pixels
        .iter()
        .filter(|p| p.is_active)
        .map(PixelConfig::effective_delay_ms)
        .max()
        .unwrap_or(0)
}

/// HTML 文本/属性转义
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// 生成可安全嵌入 `<script>` 的 JS 字符串字面量
pub fn js_string(input: &str) -> String {
    serde_json::to_string(input)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn events_or<'a>(pixel: &'a PixelConfig, default: &'a str) -> Vec<&'a str> {
    if pixel.events.is_empty() {
        vec![default]
    } else {
        pixel.events.iter().map(String::as_str).collect()
    }
}

/// 单个像素的脚本片段
pub fn render_snippet(pixel: &PixelConfig) -> String {
    let id = js_string(&pixel.tracking_id);
    let mut script = String::new();

    match pixel.provider {
        PixelProvider::Meta => {
            script.push_str(
                "!function(f,b,e,v,n,t,s){if(f.fbq)return;n=f.fbq=function(){n.callMethod?\
                 n.callMethod.apply(n,arguments):n.queue.push(arguments)};if(!f._fbq)f._fbq=n;\
                 n.push=n;n.loaded=!0;n.version='2.0';n.queue=[];t=b.createElement(e);t.async=!0;\
                 t.src=v;s=b.getElementsByTagName(e)[0];s.parentNode.insertBefore(t,s)}\
                 (window,document,'script','https://connect.facebook.net/en_US/fbevents.js');",
            );
            let _ = write!(script, "fbq('init',{});", id);
            for event in events_or(pixel, "PageView") {
                let _ = write!(script, "fbq('track',{});", js_string(event));
            }
        }
        PixelProvider::GoogleTagManager => {
            let _ = write!(
                script,
                "(function(w,d,s,l,i){{w[l]=w[l]||[];w[l].push({{'gtm.start':new Date().getTime(),\
                 event:'gtm.js'}});var f=d.getElementsByTagName(s)[0],j=d.createElement(s),\
                 dl=l!='dataLayer'?'&l='+l:'';j.async=true;\
                 j.src='https://www.googletagmanager.com/gtm.js?id='+i+dl;\
                 f.parentNode.insertBefore(j,f);}})(window,document,'script','dataLayer',{});",
                id
            );
            for event in &pixel.events {
                let _ = write!(
                    script,
                    "window.dataLayer.push({{event:{}}});",
                    js_string(event)
                );
            }
        }
        PixelProvider::LinkedIn => {
            let _ = write!(
                script,
                "window._linkedin_partner_id={id};window._linkedin_data_partner_ids=\
                 window._linkedin_data_partner_ids||[];\
                 window._linkedin_data_partner_ids.push(window._linkedin_partner_id);\
                 (function(l){{if(!l){{window.lintrk=function(a,b){{window.lintrk.q.push([a,b])}};\
                 window.lintrk.q=[]}}var s=document.getElementsByTagName('script')[0];\
                 var b=document.createElement('script');b.type='text/javascript';b.async=true;\
                 b.src='https://snap.licdn.com/li.lms-analytics/insight.min.js';\
                 s.parentNode.insertBefore(b,s);}})(window.lintrk);",
            );
            for event in &pixel.events {
                let _ = write!(
                    script,
                    "window.lintrk('track',{{conversion_id:{}}});",
                    js_string(event)
                );
            }
        }
        PixelProvider::TikTok => {
            script.push_str(
                "!function(w,d,t){w.TiktokAnalyticsObject=t;var ttq=w[t]=w[t]||[];\
                 ttq.methods=['page','track','identify','instances','debug','on','off','once',\
                 'ready','alias','group','enableCookie','disableCookie'];\
                 ttq.setAndDefer=function(t,e){t[e]=function(){t.push([e].concat(\
                 Array.prototype.slice.call(arguments,0)))}};\
                 for(var i=0;i<ttq.methods.length;i++)ttq.setAndDefer(ttq,ttq.methods[i]);\
                 ttq.load=function(e){var n='https://analytics.tiktok.com/i18n/pixel/events.js';\
                 var a=d.createElement('script');a.type='text/javascript';a.async=!0;\
                 a.src=n+'?sdkid='+e+'&lib='+t;var s=d.getElementsByTagName('script')[0];\
                 s.parentNode.insertBefore(a,s)};}(window,document,'ttq');",
            );
            let _ = write!(script, "ttq.load({});ttq.page();", id);
            for event in &pixel.events {
                let _ = write!(script, "ttq.track({});", js_string(event));
            }
        }
        PixelProvider::Twitter => {
            script.push_str(
                "!function(e,t,n,s,u,a){e.twq||(s=e.twq=function(){s.exe?s.exe.apply(s,arguments)\
                 :s.queue.push(arguments);},s.version='1.1',s.queue=[],u=t.createElement(n),\
                 u.async=!0,u.src='https://static.ads-twitter.com/uwt.js',\
                 a=t.getElementsByTagName(n)[0],a.parentNode.insertBefore(u,a))}\
                 (window,document,'script');",
            );
            let _ = write!(script, "twq('config',{});", id);
            for event in &pixel.events {
                let _ = write!(script, "twq('event',{},{{}});", js_string(event));
            }
        }
        PixelProvider::Custom => {
            return pixel.custom_script.clone().unwrap_or_default();
        }
    }

    format!("<script>{}</script>", script)
}

/// 生成中转页 HTML
pub fn build_relay_page(pixels: &[PixelConfig], destination: &str, delay_ms: u32) -> String {
    let href = escape_html(destination);
    let snippets: String = pixels
        .iter()
        .filter(|p| p.is_active)
        .map(render_snippet)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="robots" content="noindex, nofollow">
<title>Redirecting...</title>
<noscript><meta http-equiv="refresh" content="0;url={href}"></noscript>
{snippets}
</head>
<body style="font-family:system-ui,sans-serif;text-align:center;padding-top:20vh">
<p>Redirecting... <a id="qr-continue" href="{href}">Continue</a></p>
<script>(function(){{var target={target};var done=false;function go(){{if(done)return;done=true;window.location.replace(target);}}setTimeout(go, {delay_ms});document.addEventListener('click',go);}})();</script>
</body>
</html>
"#,
        href = href,
        snippets = snippets,
        target = js_string(destination),
        delay_ms = delay_ms,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(provider: PixelProvider, id: &str, delay: u32) -> PixelConfig {
        PixelConfig::new(provider, id, delay)
    }

    #[test]
    fn test_max_delay_across_active_pixels() {
        let mut off = pixel(PixelProvider::TikTok, "t", 9000);
        off.is_active = false;
        let pixels = vec![
            pixel(PixelProvider::Meta, "1", 800),
            pixel(PixelProvider::GoogleTagManager, "GTM-1", 1500),
            off,
        ];
        assert_eq!(relay_delay_ms(&pixels), 1500);
        assert_eq!(relay_delay_ms(&[]), 0);
        assert_eq!(relay_delay_ms(&[pixel(PixelProvider::Meta, "1", 50_000)]), 10_000);
    }

    #[test]
    fn test_page_contains_timer_and_click_fallback() {
        let pixels = vec![
            pixel(PixelProvider::Meta, "111", 800),
            pixel(PixelProvider::Twitter, "tw-1", 1500),
        ];
        let html = build_relay_page(&pixels, "https://example.com/a?b=1&c=2", relay_delay_ms(&pixels));
        assert!(html.contains("setTimeout(go, 1500)"));
        assert!(html.contains("addEventListener('click',go)"));
        assert!(html.contains("fbq('init',\"111\")"));
        assert!(html.contains("twq('config',\"tw-1\")"));
        assert!(html.contains(r#"href="https://example.com/a?b=1&amp;c=2""#));
        assert!(html.contains(r#"var target="https://example.com/a?b=1\u0026c=2""#));
    }

    #[test]
    fn test_tracking_id_cannot_break_out_of_script() {
        let html = build_relay_page(
            &[pixel(PixelProvider::Meta, "</script><script>alert(1)</script>", 0)],
            "https://example.com",
            0,
        );
        assert!(!html.contains("</script><script>alert(1)"));
        assert!(html.contains("\\u003c/script\\u003e"));
    }

    #[test]
    fn test_custom_script_inserted_verbatim() {
        let mut custom = pixel(PixelProvider::Custom, "", 0);
        custom.custom_script = Some("<script>window.custom=1</script>".to_string());
        let html = build_relay_page(&[custom], "https://example.com", 0);
        assert!(html.contains("<script>window.custom=1</script>"));
    }

    #[test]
    fn test_provider_events() {
        let mut gtm = pixel(PixelProvider::GoogleTagManager, "GTM-ABC", 0);
        gtm.events = vec!["qr_scan".to_string()];
        let snippet = render_snippet(&gtm);
        assert!(snippet.contains("'dataLayer',\"GTM-ABC\""));
        assert!(snippet.contains("window.dataLayer.push({event:\"qr_scan\"})"));

        let mut tiktok = pixel(PixelProvider::TikTok, "TT1", 0);
        tiktok.events = vec!["ViewContent".to_string()];
        let snippet = render_snippet(&tiktok);
        assert!(snippet.contains("ttq.load(\"TT1\");ttq.page();"));
        assert!(snippet.contains("ttq.track(\"ViewContent\")"));

        let linkedin = render_snippet(&pixel(PixelProvider::LinkedIn, "42", 0));
        assert!(linkedin.contains("window._linkedin_partner_id=\"42\""));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;");
    }
}
