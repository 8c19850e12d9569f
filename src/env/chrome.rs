//! Chrome 环境：使用 Headless Chrome 驱动真实页面
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 查找目标时执行一段 JS：按文本 / 属性匹配第一个可见可用的元素，打上 `data-stride-handle` 标记；
//! 点击时再按标记查回元素，标记不存在即视为句柄失效。headless_chrome 为阻塞 API，统一放进 spawn_blocking。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;

use crate::config::BrowserSection;
use crate::env::{ElementHandle, EnvError, Environment, Target};

const HANDLE_ATTR: &str = "data-stride-handle";

const BUTTONS: &str =
    r#"button, a, [role="button"], .btn, input[type="submit"], input[type="button"]"#;

/// 定位脚本模板：__SELECTOR__ / __PREDICATE__ / __ID__ 在运行时替换
const LOCATE_JS: &str = r#"
(function() {
    const usable = (el) => {
        if (!el || el.disabled || el.getAttribute('aria-disabled') === 'true') return false;
        const style = window.getComputedStyle(el);
        if (style.visibility === 'hidden' || style.display === 'none' || style.pointerEvents === 'none') return false;
        const rect = el.getBoundingClientRect();
        return rect.width > 0 && rect.height > 0;
    };
    for (const el of Array.from(document.querySelectorAll('__SELECTOR__'))) {
        if (!usable(el)) continue;
        const t = (el.innerText || el.textContent || el.value || '').trim().toLowerCase();
        const attrs = el.getAttributeNames ? el.getAttributeNames() : [];
        const attr = (needle) => attrs.some((n) =>
            String(el.getAttribute(n) || '').toLowerCase().replace(/\s+/g, '').includes(needle));
        if (!(__PREDICATE__)) continue;
        el.setAttribute('__ATTR__', '__ID__');
        return (el.innerText || el.textContent || el.value || '').trim().slice(0, 80);
    }
    return null;
})()
"#;

/// 任务卡片：解析「Level N」「N left」，优先仍有剩余次数的，按等级升序、剩余次数降序取第一张
const QUEST_PICK_JS: &str = r#"
(function() {
    const normalize = (v) => String(v || '').replace(/\s+/g, ' ').trim();
    const cards = Array.from(document.querySelectorAll('button[x-on\\:click*="set-expedition-data"]'));
    const parsed = cards.map((card, idx) => {
        const txt = normalize(card.textContent);
        const level = txt.match(/Level\s+(\d+)/i);
        const left = txt.match(/(\d+)\s+left/i);
        const titleEl = card.querySelector('p[x-text="expedition.title"]');
        return {
            idx,
            level: level ? Number(level[1]) : Number.POSITIVE_INFINITY,
            remaining: left ? Number(left[1]) : 0,
            title: normalize(titleEl && titleEl.textContent),
        };
    }).filter((q) => Number.isFinite(q.level));
    if (!parsed.length) return null;

    const open = parsed.filter((q) => q.remaining > 0);
    const pool = open.length ? open : parsed;
    pool.sort((a, b) => (a.level - b.level) || (b.remaining - a.remaining));
    const chosen = pool[0];
    cards[chosen.idx].setAttribute('__ATTR__', '__ID__');
    return `"${chosen.title || 'Unknown quest'}" (level ${chosen.level}, ${chosen.remaining} left)`;
})()
"#;

const SUPPRESSION_JS: &str = r#"
(function() {
    const frames = document.querySelectorAll(
        'iframe[src*="cloudflare"], iframe[src*="challenges"], iframe[src*="turnstile"], iframe[title*="turnstile"], ' +
        'iframe[src*="hcaptcha"], iframe[src*="recaptcha"], div.g-recaptcha');
    if (frames.length) return true;
    const text = (document.body && document.body.innerText || '').toLowerCase();
    return ['verifieer dat u een mens bent', 'verify that you are human', 'cloudflare', 'turnstile',
            'hcaptcha', 'recaptcha', 'please solve the puzzle', 'security check']
        .some((needle) => text.includes(needle));
})()
"#;

const THROTTLE_JS: &str = r#"
(function() {
    const text = (document.body && document.body.innerText || '').toLowerCase();
    return text.includes('too fast') || text.includes('slow down');
})()
"#;

/// 目标对应的候选选择器与 JS 判定表达式（t = 小写文本，attr(s) = 任一属性包含 s）
fn target_script(target: Target) -> (&'static str, &'static str) {
    match target {
        Target::BattleNpcs => (
            BUTTONS,
            "!/back|leave|close|cancel|return/.test(t) && t.includes('battle npc')",
        ),
        Target::GenerateEnemy => (
            BUTTONS,
            "attr('show_npc_generation_popup') || t.includes('generate enemy')",
        ),
        Target::GenerateConfirm => (BUTTONS, "attr('generatenpc') || t === 'generate'"),
        Target::BattleEnter => (BUTTONS, "t === 'battle' && attr('loading=true')"),
        Target::Attack => (
            BUTTONS,
            "!t.startsWith('special attack') && !t.startsWith('use item') && (t.startsWith('attack') || t.includes('aanval'))",
        ),
        Target::Continue => (
            BUTTONS,
            "!/back|cancel|return/.test(t) && (t.includes('continue') || t.includes('confirm') || t === 'ok' || t === 'yes')",
        ),
        Target::Leave => (BUTTONS, "t.includes('leave') || t.includes('close')"),
        // 由 QUEST_PICK_JS 单独处理
        Target::QuestCard => ("", "false"),
        Target::QuestPerform => ("button", "t.includes('perform')"),
        Target::GatherResource => (
            BUTTONS,
            "/gather|mine|chop|catch|salvage|woodcut|fishing|farming|harvest/.test(t)",
        ),
        Target::GatherAction => (
            r#"[class*="modal"] button, button, a, [role="button"], .btn"#,
            "/mine|chop|gather|harvest|catch|salvage|woodcut|fish|start|begin|do it|confirm/.test(t)",
        ),
        Target::TakeStep => (
            BUTTONS,
            "/take a step|neem een stap|stap|step|walk|move forward/.test(t)",
        ),
    }
}

fn locate_script(target: Target, id: u64) -> String {
    let template = if target == Target::QuestCard {
        QUEST_PICK_JS.to_string()
    } else {
        let (selector, predicate) = target_script(target);
        LOCATE_JS
            .replace("__SELECTOR__", selector)
            .replace("__PREDICATE__", predicate)
    };
    template
        .replace("__ATTR__", HANDLE_ATTR)
        .replace("__ID__", &id.to_string())
}

pub struct ChromeEnvironment {
    // 持有 Browser 以保持进程存活
    _browser: Browser,
    tab: Arc<Tab>,
    next_id: AtomicU64,
}

impl ChromeEnvironment {
    /// 启动浏览器并打开一个标签页（阻塞，需在 spawn_blocking 或启动阶段调用）
    pub fn launch(section: &BrowserSection) -> Result<Self, EnvError> {
        let options = LaunchOptions::default_builder()
            .headless(section.headless)
            .window_size(Some((section.window_width, section.window_height)))
            .build()
            .map_err(|e| EnvError::Launch(e.to_string()))?;
        let browser = Browser::new(options).map_err(|e| EnvError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| EnvError::Launch(format!("Browser tab failed: {}", e)))?;
        tracing::info!(headless = section.headless, "chrome launched");
        Ok(Self {
            _browser: browser,
            tab,
            next_id: AtomicU64::new(1),
        })
    }

    async fn evaluate(&self, js: String) -> Result<Option<Value>, EnvError> {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || {
            tab.evaluate(&js, false)
                .map(|obj| obj.value)
                .map_err(|e| EnvError::Probe(e.to_string()))
        })
        .await
        .map_err(|e| EnvError::Disconnected(format!("Task join: {}", e)))?
    }

    async fn evaluate_flag(&self, js: &str) -> bool {
        match self.evaluate(js.to_string()).await {
            Ok(value) => value.and_then(|v| v.as_bool()).unwrap_or(false),
            Err(e) => {
                tracing::debug!(error = %e, "page check failed");
                false
            }
        }
    }
}

#[async_trait]
impl Environment for ChromeEnvironment {
    async fn locate(&self, target: Target) -> Result<Option<ElementHandle>, EnvError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let value = self.evaluate(locate_script(target, id)).await?;
        Ok(match value {
            Some(Value::String(text)) => Some(ElementHandle::new(id, target, text)),
            _ => None,
        })
    }

    async fn click(&self, handle: &ElementHandle) -> bool {
        let tab = Arc::clone(&self.tab);
        let selector = format!("[{}=\"{}\"]", HANDLE_ATTR, handle.id);
        let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
            let element = tab
                .find_element(&selector)
                .map_err(|e| format!("Stale handle: {}", e))?;
            let _ = element.scroll_into_view();
            element.click().map_err(|e| format!("Click failed: {}", e))?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(target = %handle.target, error = %e, "click failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "click task failed");
                false
            }
        }
    }

    async fn current_location(&self) -> String {
        self.tab.get_url()
    }

    async fn navigate(&self, target: &str) -> Result<(), EnvError> {
        let tab = Arc::clone(&self.tab);
        let url = target.to_string();
        tracing::info!(url = %url, "navigate");
        tokio::task::spawn_blocking(move || {
            tab.navigate_to(&url)
                .map_err(|e| EnvError::Navigation(format!("Navigate failed: {}", e)))?;
            tab.wait_until_navigated()
                .map_err(|e| EnvError::Navigation(format!("Page load failed: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| EnvError::Disconnected(format!("Task join: {}", e)))?
    }

    async fn detect_suppression_signal(&self) -> bool {
        self.evaluate_flag(SUPPRESSION_JS).await
    }

    async fn detect_throttle_warning(&self) -> bool {
        self.evaluate_flag(THROTTLE_JS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_script_fills_placeholders() {
        let js = locate_script(Target::TakeStep, 42);
        assert!(js.contains("data-stride-handle"));
        assert!(js.contains("'42'"));
        assert!(js.contains("take a step"));
        assert!(!js.contains("__"));
    }

    #[test]
    fn test_quest_card_uses_lowest_level_pick() {
        let js = locate_script(Target::QuestCard, 9);
        assert!(js.contains("set-expedition-data"));
        assert!(js.contains("q.remaining > 0"));
        assert!(js.contains("(a.level - b.level) || (b.remaining - a.remaining)"));
        assert!(js.contains("setAttribute('data-stride-handle', '9')"));
        assert!(!js.contains("__"));
    }
}
