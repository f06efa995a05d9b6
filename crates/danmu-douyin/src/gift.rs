//! Gift enrichment: diamond prices the wire omits and combo counts that only
//! appear in the rendered display text.

use crate::proto::Text;

const DIAMOND_PREFIX: &str = "钻石";

/// Prices of "钻石"-prefixed gifts, which report a zero diamond count.
const DIAMOND_GIFTS: &[(&str, u64)] = &[
    ("嘉年华", 30000),
    ("热气球", 520),
    ("邮轮", 6000),
    ("火箭", 10001),
    ("飞艇", 20000),
    ("飞机", 3000),
    ("跑车", 1200),
    ("秘境", 13140),
    ("兔兔", 299),
];

/// Extra diamonds for a gift name, zero for ordinary gifts.
pub fn diamond_bonus(gift_name: &str) -> u64 {
    let Some(rest) = gift_name.strip_prefix(DIAMOND_PREFIX) else {
        return 0;
    };
    DIAMOND_GIFTS
        .iter()
        .find(|(name, _)| *name == rest)
        .map_or(0, |(_, price)| *price)
}

/// Parse the combo count out of a gift's display text.
///
/// Three layouts carry it: "{user}送给{1}{count}个{..}{image}" (piece 2),
/// "{user}送出{..}{image}{xN}" (piece 3) and "{user}{gift}{xN}" (piece 2).
pub fn combo_from_display(text: &Text) -> Option<u64> {
    if text.pieces.len() <= 2 {
        return None;
    }
    let pattern: String = text.default_pattern.split_whitespace().collect();
    let raw = match pattern.as_str() {
        "{0:user}送给{1}{2}个{3:string}{4:image}" => text.pieces[2].string_value.as_str(),
        "{0:user}送出{1:string}{2:image}{3:string}" => {
            skip_marker(&text.pieces.get(3)?.string_value)
        }
        "{0:user}{1:gift}{2:string}" => skip_marker(&text.pieces[2].string_value),
        _ => return None,
    };
    raw.trim().parse().ok()
}

/// Drop the leading "x"/"×" before a count.
fn skip_marker(s: &str) -> &str {
    let mut chars = s.chars();
    chars.next();
    chars.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TextPiece;

    fn text(pattern: &str, pieces: &[&str]) -> Text {
        Text {
            key: String::new(),
            default_pattern: pattern.into(),
            pieces: pieces
                .iter()
                .map(|s| TextPiece {
                    r#type: 1,
                    string_value: (*s).into(),
                })
                .collect(),
        }
    }

    #[test]
    fn diamond_prefixed_gifts_are_priced() {
        assert_eq!(diamond_bonus("钻石火箭"), 10001);
        assert_eq!(diamond_bonus("钻石兔兔"), 299);
        assert_eq!(diamond_bonus("火箭"), 0);
        assert_eq!(diamond_bonus("钻石不存在"), 0);
    }

    #[test]
    fn combo_layouts() {
        let sent_to = text("{0:user} 送给 {1}{2}个{3:string}{4:image}", &["a", "b", "12", "c"]);
        assert_eq!(combo_from_display(&sent_to), Some(12));

        let sent = text("{0:user}送出{1:string}{2:image}{3:string}", &["a", "b", "", "x5"]);
        assert_eq!(combo_from_display(&sent), Some(5));

        let plain = text("{0:user}{1:gift}{2:string}", &["a", "b", "×3"]);
        assert_eq!(combo_from_display(&plain), Some(3));
    }

    #[test]
    fn unknown_or_short_display_text() {
        assert_eq!(combo_from_display(&text("{0:user}{1:gift}", &["a", "b"])), None);
        assert_eq!(
            combo_from_display(&text("{0:user}来了{1}{2}", &["a", "b", "7"])),
            None
        );
        assert_eq!(
            combo_from_display(&text("{0:user}送出{1:string}{2:image}{3:string}", &["a", "b", "c"])),
            None
        );
    }
}
