//! Loaders for the MovieLens rating datasets.
//!
//! Raw user and item ids are re-indexed densely, in order of first
//! appearance, so that they can be used directly as embedding rows.
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv;
use failure;

use data::{Rating, Ratings};

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// The file holds no rating rows.
    #[fail(display = "The dataset contains no ratings.")]
    NoRatings,
}

/// A row of a MovieLens `ratings.csv` file.
#[derive(Debug, Deserialize)]
struct CsvRating {
    #[serde(rename = "userId")]
    user_id: u64,
    #[serde(rename = "movieId")]
    movie_id: u64,
    rating: f32,
    timestamp: u64,
}

#[derive(Debug, Default)]
struct DenseIds {
    ids: HashMap<u64, usize>,
}

impl DenseIds {
    fn get(&mut self, raw_id: u64) -> usize {
        let next_id = self.ids.len();
        *self.ids.entry(raw_id).or_insert(next_id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

fn reindex<I>(rows: I) -> Result<Ratings, failure::Error>
where
    I: Iterator<Item = Result<(u64, u64, f32, u64), csv::Error>>,
{
    let mut users = DenseIds::default();
    let mut items = DenseIds::default();

    let mut ratings = Vec::new();

    for row in rows {
        let (user_id, item_id, rating, timestamp) = row?;
        ratings.push(Rating::new(
            users.get(user_id),
            items.get(item_id),
            rating,
            timestamp as usize,
        ));
    }

    if ratings.is_empty() {
        return Err(DatasetError::NoRatings.into());
    }

    debug!(
        users = users.len(),
        items = items.len(),
        "re-indexed raw ids"
    );

    Ok(Ratings::from(ratings))
}

/// Read ratings in the `ratings.csv` format of the current MovieLens
/// releases: comma separated, with a `userId,movieId,rating,timestamp`
/// header.
pub fn read_movielens_csv<R: Read>(reader: R) -> Result<Ratings, failure::Error> {
    let mut reader = csv::Reader::from_reader(reader);

    reindex(reader.deserialize().map(|row| {
        row.map(|x: CsvRating| (x.user_id, x.movie_id, x.rating, x.timestamp))
    }))
}

/// Read ratings in the `u.data` format of MovieLens 100K: tab separated
/// `user item rating timestamp` rows without a header.
pub fn read_movielens_100k<R: Read>(reader: R) -> Result<Ratings, failure::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(reader);

    reindex(reader.deserialize())
}

/// Load a MovieLens `ratings.csv` file.
pub fn load_movielens_csv<P: AsRef<Path>>(path: P) -> Result<Ratings, failure::Error> {
    let ratings = read_movielens_csv(File::open(path.as_ref())?)?;

    info!(
        path = %path.as_ref().display(),
        ratings = ratings.len(),
        users = ratings.num_users(),
        items = ratings.num_items(),
        "loaded MovieLens ratings"
    );

    Ok(ratings)
}

/// Load a MovieLens 100K `u.data` file.
pub fn load_movielens_100k<P: AsRef<Path>>(path: P) -> Result<Ratings, failure::Error> {
    let ratings = read_movielens_100k(File::open(path.as_ref())?)?;

    info!(
        path = %path.as_ref().display(),
        ratings = ratings.len(),
        users = ratings.num_users(),
        items = ratings.num_items(),
        "loaded MovieLens 100K ratings"
    );

    Ok(ratings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_ratings_csv() {
        let data = "userId,movieId,rating,timestamp\n\
                    1,31,2.5,1260759144\n\
                    1,1029,3.0,1260759179\n\
                    7,31,4.5,1260759182\n";

        let ratings = read_movielens_csv(data.as_bytes()).unwrap();

        assert_eq!(ratings.shape(), (2, 2));
        assert_eq!(
            ratings.data(),
            &[
                Rating::new(0, 0, 2.5, 1260759144),
                Rating::new(0, 1, 3.0, 1260759179),
                Rating::new(1, 0, 4.5, 1260759182),
            ]
        );
    }

    #[test]
    fn reads_100k_data() {
        let data = "196\t242\t3\t881250949\n\
                    186\t302\t3\t891717742\n\
                    196\t377\t1\t878887116\n\
                    244\t51\t2\t880606923\n";

        let ratings = read_movielens_100k(data.as_bytes()).unwrap();

        assert_eq!(ratings.len(), 4);
        assert_eq!(ratings.shape(), (3, 4));

        let user_ids: Vec<_> = ratings.data().iter().map(|x| x.user_id()).collect();
        assert_eq!(user_ids, vec![0, 1, 0, 2]);
        assert_eq!(ratings.data()[2].rating(), 1.0);
    }

    #[test]
    fn malformed_rows_are_errors() {
        let data = "196\t242\tthree\t881250949\n";

        assert!(read_movielens_100k(data.as_bytes()).is_err());
    }

    #[test]
    fn empty_files_are_errors() {
        assert!(read_movielens_csv("userId,movieId,rating,timestamp\n".as_bytes()).is_err());
        assert!(read_movielens_100k("".as_bytes()).is_err());
    }
}
