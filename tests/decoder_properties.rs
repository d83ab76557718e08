//! Property tests for the dump decoder
//!
//! Generated entries are encoded in dump syntax, decoded again and compared.

use proptest::prelude::*;

use vista_graph::dictionary::{decode_line, DictionaryDecoder, DumpEntry, DumpValue, Subscript};

fn store_name() -> impl Strategy<Value = String> {
    ("%?", "[A-Z][A-Z0-9]{0,7}").prop_map(|(pct, name)| format!("{}{}", pct, name))
}

fn number() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..100_000).prop_map(|n| n.to_string()),
        (0u32..1000, 1u32..1000).prop_map(|(int, frac)| format!("{}.{}", int, frac)),
        (1u32..1000).prop_map(|frac| format!(".{}", frac)),
        (1u32..1000).prop_map(|n| format!("-{}", n)),
    ]
}

/// Any single-line text, quotes and separators included
fn text() -> impl Strategy<Value = String> {
    "[^\r\n]{0,24}"
}

fn subscript() -> impl Strategy<Value = Subscript> {
    prop_oneof![number().prop_map(Subscript::Num), text().prop_map(Subscript::Str)]
}

fn value() -> impl Strategy<Value = DumpValue> {
    prop_oneof![number().prop_map(DumpValue::Num), text().prop_map(DumpValue::Str)]
}

fn entry() -> impl Strategy<Value = DumpEntry> {
    (store_name(), prop::collection::vec(subscript(), 0..6), value()).prop_map(
        |(store, subscripts, value)| DumpEntry {
            store,
            subscripts,
            value,
            line_number: 1,
        },
    )
}

proptest! {
    #[test]
    fn encoded_entries_decode_to_the_same_triple(original in entry()) {
        let line = original.encode();
        let decoded = decode_line(&line, 1);
        prop_assert!(decoded.is_ok(), "failed to decode {:?}: {:?}", line, decoded);
        let decoded = decoded.unwrap();
        prop_assert_eq!(&decoded, &original);
        prop_assert_eq!(decoded.encode(), line);
    }

    #[test]
    fn streamed_dump_yields_every_entry(entries in prop::collection::vec(entry(), 1..20)) {
        let mut text = String::from("GT.M MUPIP EXTRACT\nZWR\n");
        for entry in &entries {
            text.push_str(&entry.encode());
            text.push('\n');
        }

        let mut decoder = DictionaryDecoder::new(text.as_bytes(), "prop.zwr");
        let decoded: Vec<DumpEntry> = decoder.by_ref().collect();
        prop_assert_eq!(decoded.len(), entries.len());
        for (got, want) in decoded.iter().zip(&entries) {
            prop_assert_eq!(&got.store, &want.store);
            prop_assert_eq!(&got.subscripts, &want.subscripts);
            prop_assert_eq!(&got.value, &want.value);
        }
        prop_assert_eq!(decoder.stats().malformed, 0);
        prop_assert_eq!(decoder.stats().header_lines, 2);
    }

    #[test]
    fn multi_line_values_are_joined(head in "[a-z ]{0,12}", tail in "[a-z ]{1,12}") {
        let text = format!("^DD(2,.01,21,1,0)=\"{}\n{}\"\n^DD(2,0)=\"PATIENT\"\n", head, tail);
        let mut decoder = DictionaryDecoder::new(text.as_bytes(), "prop.zwr");
        let first = decoder.next();
        prop_assert!(first.is_some());
        let first = first.unwrap();
        let expected = format!("{}\n{}", head, tail);
        prop_assert_eq!(first.value(), expected.as_str());
        prop_assert_eq!(first.line_number, 1);
        let second = decoder.next();
        prop_assert!(second.is_some());
        let second = second.unwrap();
        prop_assert_eq!(second.value(), "PATIENT");
        prop_assert_eq!(decoder.stats().continued_entries, 1);
    }

    #[test]
    fn arbitrary_lines_never_panic(line in "\\PC{0,64}") {
        let _ = decode_line(&line, 1);
    }
}
