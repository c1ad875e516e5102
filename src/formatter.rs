//! Event name namespacing.

/// Prefixes event names with a configured namespace.
///
/// Formatting is idempotent: a name that already starts with the namespace
/// followed by `.` or `\` is returned unchanged, so formatting a formatted
/// name is a no-op. `.` and `\` are interchangeable inside the namespace, so
/// PHP-style class names match a dotted namespace. An empty namespace
/// disables prefixing.
///
/// # Examples
///
/// ```
/// use echo_nats::formatter::EventFormatter;
///
/// let formatter = EventFormatter::new("App.Events");
/// assert_eq!(formatter.format("OrderShipped"), "App.Events.OrderShipped");
/// assert_eq!(
///     formatter.format("App.Events.OrderShipped"),
///     "App.Events.OrderShipped"
/// );
/// assert_eq!(
///     formatter.format("App\\Events\\OrderShipped"),
///     "App\\Events\\OrderShipped"
/// );
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFormatter {
    namespace: String,
}

impl EventFormatter {
    /// Create a formatter for `namespace`. Trailing separators are trimmed.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        let mut namespace = namespace.into();
        let trimmed = namespace.trim_end_matches(['.', '\\']).len();
        namespace.truncate(trimmed);
        Self { namespace }
    }

    /// Configured namespace, without a trailing separator.
    #[must_use]
    pub fn namespace(&self) -> &str { &self.namespace }

    /// Whether `event` already carries the namespace prefix.
    #[must_use]
    pub fn is_namespaced(&self, event: &str) -> bool {
        if self.namespace.is_empty() {
            return true;
        }
        let mut rest = event.chars();
        let prefix_matches = self.namespace.chars().all(|expected| {
            rest.next()
                .is_some_and(|got| got == expected || (is_separator(got) && is_separator(expected)))
        });
        prefix_matches && rest.next().is_some_and(is_separator)
    }

    /// Prefix `event` with the namespace unless it is already prefixed.
    #[must_use]
    pub fn format(&self, event: &str) -> String {
        if self.is_namespaced(event) {
            event.to_owned()
        } else {
            format!("{}.{event}", self.namespace)
        }
    }
}

fn is_separator(c: char) -> bool { matches!(c, '.' | '\\') }

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("App.Events", "Created", "App.Events.Created")]
    #[case("App.Events.", "Created", "App.Events.Created")]
    #[case("App.Events", "App.Events.Created", "App.Events.Created")]
    #[case("App.Events", "App.EventsCreated", "App.Events.App.EventsCreated")]
    #[case("App.Events", "App\\Events\\Created", "App\\Events\\Created")]
    #[case("App.Events", "App\\Events.Created", "App\\Events.Created")]
    #[case("App.Events", "App\\EventsCreated", "App.Events.App\\EventsCreated")]
    #[case("App\\Events", "App.Events.Created", "App.Events.Created")]
    #[case("", "Created", "Created")]
    #[case("App.Events", "", "App.Events.")]
    fn formats_event_names(#[case] namespace: &str, #[case] event: &str, #[case] expected: &str) {
        assert_eq!(EventFormatter::new(namespace).format(event), expected);
    }

    proptest! {
        #[test]
        fn formatting_is_idempotent(namespace in "[A-Za-z.\\\\]{0,12}", event in "\\PC{0,24}") {
            let formatter = EventFormatter::new(namespace);
            let once = formatter.format(&event);
            prop_assert_eq!(formatter.format(&once), once);
        }
    }
}
