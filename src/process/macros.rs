// Command-template macro expansion and shell-style quoting

use crate::names::SequenceGenerator;

/// Replaced everywhere with the short name of the run
pub const NAME_MACRO: &str = "{name}";

/// Replaced, one occurrence at a time, with the next sequence ID
pub const SEQ_MACRO: &str = "{seq}";

/// Expand `{name}` and `{seq}` in every argument
///
/// Sequence IDs are consumed strictly left to right across the arguments.
/// Without a sequence generator `{seq}` is left as written.
pub fn expand_args(
    args: &[String],
    short_name: &str,
    sequence: Option<&dyn SequenceGenerator>,
) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let mut arg = arg.replace(NAME_MACRO, short_name);
            if let Some(seq) = sequence {
                while arg.contains(SEQ_MACRO) {
                    arg = arg.replacen(SEQ_MACRO, &seq.next_id(), 1);
                }
            }
            arg
        })
        .collect()
}

/// Render a command and its arguments as one shell-quoted line
pub fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        return command.to_string();
    }
    format!("{} {}", command, shell_words::join(args))
}
