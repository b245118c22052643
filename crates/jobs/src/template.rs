//! Message templates with `@placeholder` interpolation.

/// Values substituted into message templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub title: String,
    pub current: u64,
    pub total: u64,
    pub errors: u64,
    pub inserted: u64,
    pub updated: u64,
}

impl TemplateVars {
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.current)
    }

    pub fn percentage(&self) -> u8 {
        percentage(self.current, self.total)
    }

    /// Render `template`, replacing `@title`, `@current`, `@total`,
    /// `@remaining`, `@percentage`, `@errors`, `@inserted` and `@updated`.
    ///
    /// Substituted values are never expanded again.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(at) = rest.find('@') {
            out.push_str(&rest[..at]);
            let tail = &rest[at..];
            match self.expand(tail) {
                Some((placeholder, value)) => {
                    out.push_str(&value);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    out.push('@');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn expand(&self, tail: &str) -> Option<(&'static str, String)> {
        const PLACEHOLDERS: [&str; 8] = [
            "@title",
            "@current",
            "@total",
            "@remaining",
            "@percentage",
            "@errors",
            "@inserted",
            "@updated",
        ];
        let placeholder = PLACEHOLDERS.into_iter().find(|p| tail.starts_with(p))?;
        let value = match placeholder {
            "@title" => self.title.clone(),
            "@current" => self.current.to_string(),
            "@total" => self.total.to_string(),
            "@remaining" => self.remaining().to_string(),
            "@percentage" => self.percentage().to_string(),
            "@errors" => self.errors.to_string(),
            "@inserted" => self.inserted.to_string(),
            _ => self.updated.to_string(),
        };
        Some((placeholder, value))
    }
}

/// `round(done * 100 / total)`, clamped to 100. An empty total counts as done.
pub fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = u128::from(done.min(total));
    let total = u128::from(total);
    ((done * 100 + total / 2) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn renders_all_placeholders() {
        let vars = TemplateVars {
            title: "Product import".to_string(),
            current: 10,
            total: 25,
            errors: 3,
            inserted: 6,
            updated: 1,
        };
        assert_eq!(
            vars.render("@title: @current/@total (@percentage%), @remaining left, @errors errors, @inserted new, @updated changed"),
            "Product import: 10/25 (40%), 15 left, 3 errors, 6 new, 1 changed"
        );
    }

    #[test]
    fn title_text_is_not_expanded() {
        let vars = TemplateVars {
            title: "Export @total rows".to_string(),
            current: 1,
            total: 1,
            ..TemplateVars::default()
        };
        assert_eq!(
            vars.render("@title finished: @current of @total processed."),
            "Export @total rows finished: 1 of 1 processed."
        );
        assert_eq!(vars.render("mail me @ home, @unknown"), "mail me @ home, @unknown");
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(10, 25), 40);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 200), 1);
        assert_eq!(percentage(0, 0), 100);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: percentages stay in [0, 100] and grow with `done`.
        #[test]
        fn percentage_is_bounded_and_monotonic(total in 1u64..1_000_000, a in 0u64..2_000_000, b in 0u64..2_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let p_lo = percentage(lo, total);
            let p_hi = percentage(hi, total);
            prop_assert!(p_hi <= 100);
            prop_assert!(p_lo <= p_hi);
        }
    }
}
