/// Localization resolver — best-content lookup with main-locale fallback.

use crate::schema::node::{LocalizedContent, NodeElement};

/// The outcome of a lookup: the chosen content plus whether the runtime had
/// to fall back because the requested translation was missing or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedContent<'a> {
    pub text: &'a str,
    pub locale_code: &'a str,
    pub not_translated: bool,
}

/// Resolve the best content from a localized-content list.
///
/// Non-translatable entries always resolve in the main locale. Otherwise the
/// requested locale wins when it has non-empty text; a missing or empty
/// translation falls back to the main locale and is flagged `not_translated`.
pub fn resolve_contents<'a>(
    contents: &'a [LocalizedContent],
    translatable: bool,
    locale: &str,
    main_locale: &str,
) -> Option<ResolvedContent<'a>> {
    let effective = if !translatable && locale != main_locale {
        main_locale
    } else {
        locale
    };

    let exact = contents
        .iter()
        .find(|c| c.locale_code == effective)
        .filter(|c| !c.text.is_empty());
    if let Some(content) = exact {
        return Some(ResolvedContent {
            text: &content.text,
            locale_code: &content.locale_code,
            not_translated: false,
        });
    }

    if effective == main_locale {
        // Nothing to fall back to; surface the (possibly empty) main entry.
        return contents
            .iter()
            .find(|c| c.locale_code == main_locale)
            .map(|c| ResolvedContent {
                text: &c.text,
                locale_code: &c.locale_code,
                not_translated: false,
            });
    }

    contents
        .iter()
        .find(|c| c.locale_code == main_locale)
        .map(|c| ResolvedContent {
            text: &c.text,
            locale_code: &c.locale_code,
            not_translated: true,
        })
}

/// Element shorthand: resolve against the element's contents, honoring the
/// containing node's translatable flag.
pub fn resolve_element<'a>(
    element: &'a NodeElement,
    translatable: bool,
    locale: &str,
    main_locale: &str,
) -> Option<ResolvedContent<'a>> {
    resolve_contents(&element.localized_contents, translatable, locale, main_locale)
}
