//! Entity Selector Language
//!
//! A small string language naming a live set of entities for rules.
//!
//! # Syntax
//!
//! ```text
//! @player                  // The entity whose id is "player"
//! #enemy                   // Entities tagged "enemy"
//! !enter                   // Entities that started a collision this step
//! #enemy:#boss             // Tagged "enemy" AND tagged "boss"
//! @player, #enemy          // "player" OR anything tagged "enemy"
//! ```
//!
//! Refinement (`:`) binds tighter than union (`,`), so a selector is always a
//! union of refinement chains.
//!
//! # Examples
//!
//! ```
//! use selector_dsl::{parse_selector, Selector};
//!
//! let selector = parse_selector("@player, !enter:#enemies").unwrap();
//! assert_eq!(selector.chains().count(), 2);
//! assert_eq!(selector.to_string(), "@player, !enter:#enemies");
//! ```

mod parser;

pub use parser::{EventKind, Links, ParseError, Selector, parse_selector};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_selector() {
        let selector = parse_selector("@player").unwrap();
        assert_eq!(selector, Selector::id("player"));
        assert!(selector.next().is_none());
    }

    #[test]
    fn test_tag_selector() {
        let selector = parse_selector("#enemies").unwrap();
        assert_eq!(selector, Selector::tag("enemies"));
    }

    #[test]
    fn test_event_selectors() {
        assert_eq!(
            parse_selector("!enter").unwrap(),
            Selector::event(EventKind::Enter)
        );
        assert_eq!(
            parse_selector("!exit").unwrap(),
            Selector::event(EventKind::Exit)
        );
    }

    #[test]
    fn test_chaining() {
        let selector = parse_selector("#tag1:#tag2").unwrap();
        match &selector {
            Selector::Tag { name, next } => {
                assert_eq!(name, "tag1");
                assert_eq!(next.as_deref(), Some(&Selector::tag("tag2")));
            }
            other => panic!("expected tag selector, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let selector = parse_selector("@player, !enter:#enemies:#boss").unwrap();
        let Selector::Union(chains) = &selector else {
            panic!("expected union, got {selector:?}");
        };
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0], Selector::id("player"));

        let links: Vec<&Selector> = chains[1].links().collect();
        assert_eq!(links.len(), 3);
        assert!(matches!(
            links[0],
            Selector::Event {
                kind: EventKind::Enter,
                ..
            }
        ));
        assert!(matches!(links[1], Selector::Tag { name, .. } if name == "enemies"));
        assert!(matches!(links[2], Selector::Tag { name, next: None } if name == "boss"));
    }

    #[test]
    fn test_union_preserves_order() {
        let selector = parse_selector("#c, #a, #b").unwrap();
        let names: Vec<String> = selector.chains().map(ToString::to_string).collect();
        assert_eq!(names, ["#c", "#a", "#b"]);
    }

    #[test]
    fn test_whitespace_handling() {
        let spaced = parse_selector("@player , @boss").unwrap();
        let tight = parse_selector("@player,@boss").unwrap();
        assert_eq!(spaced, tight);

        let padded = parse_selector("  @player  ").unwrap();
        assert_eq!(padded, Selector::id("player"));

        let chain = parse_selector(" #a : #b ").unwrap();
        assert_eq!(chain, parse_selector("#a:#b").unwrap());
    }

    #[test]
    fn test_rejected_inputs() {
        for input in ["", "   ", "@", "#", "@@x", "!unknown", "!", "@a,", "@a #b", ",@a"] {
            assert!(parse_selector(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_event_names_are_case_sensitive() {
        assert!(parse_selector("!Enter").is_err());
    }

    #[test]
    fn test_canonical_display() {
        let selector = parse_selector("  @player ,!enter : #enemies:#boss ").unwrap();
        insta::assert_snapshot!(selector.to_string(), @"@player, !enter:#enemies:#boss");
    }

    #[test]
    fn test_round_trip() {
        let inputs = [
            "@player",
            "#enemy",
            "!exit",
            "#tag1:#tag2",
            "@a, #b, !enter",
            "@player, !enter:#enemies:#boss",
            "!exit:@door:#locked, #ui",
        ];

        for input in inputs {
            let parsed = parse_selector(input).unwrap();
            let reparsed = parse_selector(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "round trip failed for {input:?}");
        }
    }

    #[test]
    fn test_from_str() {
        let selector: Selector = "#enemy:#boss".parse().unwrap();
        assert_eq!(selector, Selector::tag("enemy").refined_by(Selector::tag("boss")));
    }
}
