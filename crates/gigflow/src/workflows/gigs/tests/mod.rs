mod common;
mod penalties;
mod routing;
