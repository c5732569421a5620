//! Driver options as command-line arguments with environment fallbacks.

use clap::builder::BoolishValueParser;
use clap::{Arg, ArgAction, ArgMatches};
use dm_driver::flags::create_flags;
use dm_driver::options::parse_int;
use dm_driver::{ConfigError, DriverOptions, Flag, FlagKind};

/// One argument per declared driver flag.
pub fn driver_args() -> Vec<Arg> {
    create_flags().iter().map(flag_arg).collect()
}

fn flag_arg(flag: &'static Flag) -> Arg {
    let arg = Arg::new(flag.name)
        .long(flag.name)
        .env(flag.env_var)
        .help(flag.usage);

    match flag.kind {
        FlagKind::String("") => arg.action(ArgAction::Set),
        FlagKind::String(default) => arg.action(ArgAction::Set).default_value(default),
        // defaults for integers are applied by `parse_int`
        FlagKind::Int(_) => arg.action(ArgAction::Set),
        FlagKind::Bool => arg
            .action(ArgAction::SetTrue)
            .value_parser(BoolishValueParser::new()),
        FlagKind::StringSlice => arg.action(ArgAction::Append).value_delimiter(','),
    }
}

/// [`DriverOptions`] over parsed arguments.
pub struct MatchesOptions<'a> {
    matches: &'a ArgMatches,
}

impl<'a> MatchesOptions<'a> {
    pub fn new(matches: &'a ArgMatches) -> Self {
        Self { matches }
    }
}

impl DriverOptions for MatchesOptions<'_> {
    fn string(&self, key: &str) -> String {
        self.matches
            .try_get_one::<String>(key)
            .ok()
            .flatten()
            .cloned()
            .unwrap_or_default()
    }

    fn string_slice(&self, key: &str) -> Vec<String> {
        self.matches
            .try_get_many::<String>(key)
            .ok()
            .flatten()
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    }

    fn bool(&self, key: &str) -> bool {
        self.matches
            .try_get_one::<bool>(key)
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false)
    }

    fn int(&self, key: &str) -> Result<i64, ConfigError> {
        parse_int(key, &self.string(key))
    }
}
