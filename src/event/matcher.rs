//! MQTT-подобное сравнение опубликованного домена с шаблоном подписки.
//!
//! `+` поглощает ровно один сегмент (в том числе пустой хвостовой),
//! `#` поглощает весь остаток строки, включая ноль сегментов.

use tracing::warn;

/// Символы, допустимые только в шаблонах подписки.
pub const WILDCARDS: [char; 2] = ['+', '#'];

/// Содержит ли строка wildcard-символы.
pub fn has_wildcards(s: &str) -> bool {
    s.contains(WILDCARDS)
}

/// Проверяет, совпадает ли опубликованный домен с шаблоном подписки.
///
/// Опубликованный домен с `+` или `#` отвергается (с предупреждением в
/// логе). Сравнение побайтовое, что для UTF-8 эквивалентно посимвольному:
/// `/`, `+` и `#` однобайтовые и не встречаются внутри многобайтовых
/// последовательностей.
pub fn topic_matches(
    published: &str,
    pattern: &str,
) -> bool {
    if has_wildcards(published) {
        warn!(domain = %published, "Illegal wildcard in published domain");
        return false;
    }

    let publ = published.as_bytes();
    let pat = pattern.as_bytes();
    let mut ps = 0usize;
    let mut skipping = false;

    for &c in publ {
        if skipping {
            // внутри сегмента, поглощённого `+`
            if c == b'/' {
                ps += 1;
                skipping = false;
            }
            continue;
        }
        if ps >= pat.len() {
            return false;
        }
        if c == pat[ps] {
            ps += 1;
            continue;
        }
        match pat[ps] {
            b'#' => return true,
            b'+' => {
                skipping = true;
                ps += 1;
            }
            _ => return false,
        }
    }

    match &pat[ps..] {
        [] => true,
        [b'+'] | [b'#'] => true,
        _ => false,
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
