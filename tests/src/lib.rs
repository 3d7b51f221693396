//! End-to-end checks of the probing engine against local listeners.

#[cfg(test)]
mod ping {
    mod integration;
}

#[cfg(test)]
mod resolver {
    mod integration;
}
