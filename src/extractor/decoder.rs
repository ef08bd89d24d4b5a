// src/extractor/decoder.rs

//! 还原不透明 ID 来源返回的混淆链接。
//!
//! 链接以两字符一组的十六进制对编码，每组经固定替换表映射为一个可打印字符。
//! 替换表来自站点实际流量，必须逐项保持一致。

use regex::Regex;
use std::{collections::HashMap, sync::LazyLock};

static PORT_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+$").unwrap());

#[rustfmt::skip]
const SUBSTITUTIONS: &[(&str, char)] = &[
    ("79", 'A'), ("7a", 'B'), ("7b", 'C'), ("7c", 'D'), ("7d", 'E'), ("7e", 'F'), ("7f", 'G'),
    ("70", 'H'), ("71", 'I'), ("72", 'J'), ("73", 'K'), ("74", 'L'), ("75", 'M'), ("76", 'N'),
    ("77", 'O'), ("68", 'P'), ("69", 'Q'), ("6a", 'R'), ("6b", 'S'), ("6c", 'T'), ("6d", 'U'),
    ("6e", 'V'), ("6f", 'W'), ("60", 'X'), ("61", 'Y'), ("62", 'Z'),
    ("59", 'a'), ("5a", 'b'), ("5b", 'c'), ("5c", 'd'), ("5d", 'e'), ("5e", 'f'), ("5f", 'g'),
    ("50", 'h'), ("51", 'i'), ("52", 'j'), ("53", 'k'), ("54", 'l'), ("55", 'm'), ("56", 'n'),
    ("57", 'o'), ("48", 'p'), ("49", 'q'), ("4a", 'r'), ("4b", 's'), ("4c", 't'), ("4d", 'u'),
    ("4e", 'v'), ("4f", 'w'), ("40", 'x'), ("41", 'y'), ("42", 'z'),
    ("08", '0'), ("09", '1'), ("0a", '2'), ("0b", '3'), ("0c", '4'), ("0d", '5'), ("0e", '6'),
    ("0f", '7'), ("00", '8'), ("01", '9'),
    ("15", '-'), ("16", '.'), ("67", '_'), ("46", '~'), ("02", ':'), ("17", '/'), ("07", '?'),
    ("1b", '#'), ("63", '['), ("65", ']'), ("78", '@'), ("19", '!'), ("1c", '$'), ("1e", '&'),
    ("10", '('), ("11", ')'), ("12", '*'), ("13", '+'), ("14", ','), ("03", ';'), ("05", '='),
    ("1d", '%'),
];

static TABLE: LazyLock<HashMap<&'static str, char>> =
    LazyLock::new(|| SUBSTITUTIONS.iter().copied().collect());

/// 解码混淆字符串。总是成功：未知的字符对原样保留，
/// 末尾不足两个字符的部分被丢弃，结尾的 `:端口` 后缀原样保留。
pub fn decode(token: &str) -> String {
    let (body, port) = match PORT_SUFFIX_RE.find(token) {
        Some(m) => (&token[..m.start()], m.as_str()),
        None => (token, ""),
    };

    let chars: Vec<char> = body.chars().collect();
    let mut decoded = String::with_capacity(chars.len() / 2 + port.len());
    for pair in chars.chunks_exact(2) {
        let key: String = pair.iter().collect::<String>().to_ascii_lowercase();
        match TABLE.get(key.as_str()) {
            Some(c) => decoded.push(*c),
            None => decoded.extend(pair),
        }
    }
    decoded.push_str(port);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(plain: &str) -> String {
        plain
            .chars()
            .map(|c| {
                SUBSTITUTIONS
                    .iter()
                    .find(|(_, v)| *v == c)
                    .map(|(k, _)| k.to_string())
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_decode_known_examples() {
        assert_eq!(decode(""), "");
        assert_eq!(decode("79"), "A");
        assert_eq!(decode("79:1935"), "A:1935");
        assert_eq!(decode("175b54575b53"), "/clock");
    }

    #[test]
    fn test_decode_full_path() {
        let path = "/apivtwo/clock?id=abc-123&x=y_z~";
        assert_eq!(decode(&encode(path)), path);
    }

    #[test]
    fn test_unknown_pairs_pass_through() {
        assert_eq!(decode("79zz7a"), "AzzB");
        assert_eq!(decode("XY"), "XY");
    }

    #[test]
    fn test_odd_remainder_is_dropped() {
        assert_eq!(decode("797"), "A");
        assert_eq!(decode("7"), "");
        assert_eq!(decode("797:8080"), "A:8080");
    }

    #[test]
    fn test_uppercase_pairs_are_accepted() {
        assert_eq!(decode("7A7B"), "BC");
    }

    #[test]
    fn test_multibyte_input_does_not_panic() {
        assert_eq!(decode("字符79"), "字符A");
    }

    #[test]
    fn test_every_table_entry_is_total_and_unique() {
        let all: String = SUBSTITUTIONS.iter().map(|(k, _)| *k).collect();
        let decoded = decode(&all);
        assert_eq!(decoded.chars().count(), SUBSTITUTIONS.len());
        assert_eq!(TABLE.len(), SUBSTITUTIONS.len());
    }

    #[test]
    fn test_table_matches_xor_rule() {
        // 表项恰好满足 字节 ^ 0x38，这里只做记录，解码不依赖此规律
        for (pair, c) in SUBSTITUTIONS {
            let byte = u8::from_str_radix(pair, 16).unwrap();
            assert_eq!((byte ^ 0x38) as char, *c, "pair {}", pair);
        }
    }
}
