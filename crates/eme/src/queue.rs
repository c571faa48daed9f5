use url::Url;

/// Ordered segment locators with a forward-only cursor.
#[derive(Debug, Clone)]
pub struct AssetQueue {
    locators: Vec<Url>,
    cursor: usize,
}

impl AssetQueue {
    pub fn new(locators: Vec<Url>) -> Self {
        Self {
            locators,
            cursor: 0,
        }
    }

    /// Parses every locator, failing on the first malformed one.
    pub fn parse<I, S>(locators: I) -> Result<Self, url::ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let locators = locators
            .into_iter()
            .map(|l| Url::parse(l.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(locators))
    }

    /// Takes the locator under the cursor and moves the cursor past it.
    ///
    /// The cursor moves on dispatch, so a second call never hands out the same index twice.
    pub fn next(&mut self) -> Option<(usize, &Url)> {
        let index = self.cursor;
        let locator = self.locators.get(index)?;
        self.cursor += 1;
        Some((index, locator))
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == self.locators.len()
    }

    pub fn remaining(&self) -> usize {
        self.locators.len() - self.cursor
    }
}
